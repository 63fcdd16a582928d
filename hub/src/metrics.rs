use prometheus::GaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

use harborwatch_model::CircuitBreakerState;

lazy_static::lazy_static! {
    pub static ref HUB_CIRCUIT_BREAKER_STATE: GaugeVec = GaugeVec::new(
        Opts::new(
            "harborwatch_hub_circuit_breaker_state",
            "Circuit breaker state per hub: 0 enabled, 1 checking health, 2 disabled",
        ),
        &["hub"],
    ).expect("Failed to create HUB_CIRCUIT_BREAKER_STATE");

    pub static ref HUB_CONSECUTIVE_FAILURES: GaugeVec = GaugeVec::new(
        Opts::new("harborwatch_hub_consecutive_failures", "Consecutive failed calls to a hub"),
        &["hub"],
    ).expect("Failed to create HUB_CONSECUTIVE_FAILURES");

    pub static ref HUB_IN_FLIGHT_SCANS: GaugeVec = GaugeVec::new(
        Opts::new("harborwatch_hub_in_flight_scans", "Scans started but not yet confirmed complete by a hub"),
        &["hub"],
    ).expect("Failed to create HUB_IN_FLIGHT_SCANS");

    pub static ref HUB_CACHED_RESULTS: GaugeVec = GaugeVec::new(
        Opts::new("harborwatch_hub_cached_results", "Scan results cached from a hub"),
        &["hub"],
    ).expect("Failed to create HUB_CACHED_RESULTS");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(error) = registry.register(Box::new(HUB_CIRCUIT_BREAKER_STATE.clone())) {
        debug!(logger, "Failed to register HUB_CIRCUIT_BREAKER_STATE"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(HUB_CONSECUTIVE_FAILURES.clone())) {
        debug!(logger, "Failed to register HUB_CONSECUTIVE_FAILURES"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(HUB_IN_FLIGHT_SCANS.clone())) {
        debug!(logger, "Failed to register HUB_IN_FLIGHT_SCANS"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(HUB_CACHED_RESULTS.clone())) {
        debug!(logger, "Failed to register HUB_CACHED_RESULTS"; "error" => ?error);
    }
}

fn state_code(state: CircuitBreakerState) -> f64 {
    match state {
        CircuitBreakerState::Enabled => 0.0,
        CircuitBreakerState::CheckingHealth => 1.0,
        CircuitBreakerState::Disabled => 2.0,
    }
}

/// Pushes one hub's current counters onto the gauges above. Called by the
/// metrics ticker once per `model_metrics_pause`, once per known hub.
pub fn observe(hub: &str, state: CircuitBreakerState, consecutive_failures: u32, in_flight: usize, cached: usize) {
    HUB_CIRCUIT_BREAKER_STATE.with_label_values(&[hub]).set(state_code(state));
    HUB_CONSECUTIVE_FAILURES.with_label_values(&[hub]).set(consecutive_failures as f64);
    HUB_IN_FLIGHT_SCANS.with_label_values(&[hub]).set(in_flight as f64);
    HUB_CACHED_RESULTS.with_label_values(&[hub]).set(cached as f64);
}
