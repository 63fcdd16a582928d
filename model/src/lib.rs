//! In-memory scan-status model and the single-writer reducer that owns it.
//!
//! Everything in this crate that can mutate or query the `Model` goes
//! through an `Action` submitted on the `Reducer`'s channel; there is no
//! other path in and no locking anywhere here (§4.1).

mod actions;
mod config;
mod digest;
mod entities;
mod error;
mod metrics;
mod model;
mod reducer;
mod snapshot;
mod status;

pub use self::actions::Action;
pub use self::actions::Reply;
pub use self::config::ModelConfig;
pub use self::config::ModelTime;
pub use self::config::ModelTimings;
pub use self::digest::Digest;
pub use self::entities::CodeLocation;
pub use self::entities::Image;
pub use self::entities::ImageRef;
pub use self::entities::Layer;
pub use self::entities::Pod;
pub use self::entities::PodKey;
pub use self::entities::ScanResults;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::model::Model;
pub use self::model::ModelMetrics;
pub use self::reducer::spawn_metrics_ticker;
pub use self::reducer::spawn_refresh_ticker;
pub use self::reducer::spawn_stalled_scan_ticker;
pub use self::reducer::spawn_ticker;
pub use self::reducer::ActionSubmitter;
pub use self::reducer::Reducer;
pub use self::snapshot::HubCircuitBreakerInfo;
pub use self::snapshot::ModelSnapshot;
pub use self::status::CircuitBreakerState;
pub use self::status::ScanStatus;

/// Attempts to register this crate's metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &slog::Logger, registry: &prometheus::Registry) {
    self::metrics::register_metrics(logger, registry);
}
