use chrono::DateTime;
use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::config::ModelConfig;
use crate::config::ModelTimings;
use crate::digest::Digest;
use crate::entities::Image;
use crate::entities::Pod;
use crate::status::CircuitBreakerState;

/// Circuit breaker fields for the primary hub's client (§6 `HubCircuitBreaker`).
///
/// Defined here, not in `harborwatch_hub`, so `ModelSnapshot` can embed it
/// without a dependency cycle (`harborwatch_hub` already depends on this
/// crate); `HubClient::circuit_breaker_info` builds one of these directly
/// and `harborwatch_hub` re-exports the type under its own name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubCircuitBreakerInfo {
    pub state: CircuitBreakerState,
    pub next_check_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Default for HubCircuitBreakerInfo {
    /// Reported when no hub has registered yet, e.g. before the first
    /// `SetHubs` call completes.
    fn default() -> HubCircuitBreakerInfo {
        HubCircuitBreakerInfo { state: CircuitBreakerState::Enabled, next_check_time: None, consecutive_failures: 0 }
    }
}

/// A point-in-time, fully-owned copy of the model, returned by `GetModel`
/// (§4.1, §6). Cloned out of the live state rather than borrowed, so the
/// caller can hold it across a channel send without blocking the reducer.
///
/// Serialisable so it round-trips as the JSON record §6 describes. The
/// `Model` itself has no visibility into any hub connection, so
/// `hub_circuit_breaker` comes back as `HubCircuitBreakerInfo::default()`
/// here; the binary crate overlays the live value from its `HubManager`
/// before this leaves the process (see `harborwatch::run_snapshot_ticker`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub pods: Vec<Pod>,
    pub images: Vec<Image>,
    pub image_scan_queue: Vec<Digest>,
    pub image_hub_check_queue: Vec<Digest>,
    pub hub_version: String,
    pub hub_circuit_breaker: HubCircuitBreakerInfo,
    pub config: ModelConfig,
    pub timings: ModelTimings,
}
