//! Per-hub client: circuit breaker, in-flight scan bookkeeping, scan-result
//! cache, and the background loops that keep them current (§4.4).
//!
//! Everything above this crate talks to a hub exclusively through a
//! `HubClient`'s public methods and its `Update` stream; the `RawHubClient`
//! trait is the only place that would ever issue an actual network call.

mod circuit_breaker;
mod config;
mod error;
mod hub_client;
mod metrics;
mod raw;
mod scan_client;
mod update;

pub use self::circuit_breaker::CircuitBreaker;
pub use self::config::CircuitBreakerConfig;
pub use self::config::HubConfig;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::hub_client::HubClient;
pub use harborwatch_model::HubCircuitBreakerInfo;
pub use self::raw::MockRawHubClient;
pub use self::raw::RawHubClient;
pub use self::scan_client::MockScanClient;
pub use self::scan_client::ScanClient;
pub use self::scan_client::ScanJob;
pub use self::update::Update;

/// Attempts to register this crate's metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &slog::Logger, registry: &prometheus::Registry) {
    self::metrics::register_metrics(logger, registry);
}
