use prometheus::Gauge;
use prometheus::GaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

use crate::model::ModelMetrics;

lazy_static::lazy_static! {
    pub static ref MODEL_IMAGES_BY_STATUS: GaugeVec = GaugeVec::new(
        Opts::new(
            "harborwatch_model_images_by_status",
            "Number of tracked images grouped by scan status",
        ),
        &["status"],
    ).expect("Failed to create MODEL_IMAGES_BY_STATUS");

    pub static ref MODEL_SCAN_QUEUE_LEN: Gauge = Gauge::with_opts(
        Opts::new("harborwatch_model_scan_queue_len", "Images waiting in the scan queue")
    ).expect("Failed to create MODEL_SCAN_QUEUE_LEN");

    pub static ref MODEL_HUB_CHECK_QUEUE_LEN: Gauge = Gauge::with_opts(
        Opts::new("harborwatch_model_hub_check_queue_len", "Images waiting in the hub-check queue")
    ).expect("Failed to create MODEL_HUB_CHECK_QUEUE_LEN");

    pub static ref MODEL_POD_COUNT: Gauge = Gauge::with_opts(
        Opts::new("harborwatch_model_pod_count", "Pods currently tracked by the model")
    ).expect("Failed to create MODEL_POD_COUNT");

    pub static ref MODEL_IMAGE_COUNT: Gauge = Gauge::with_opts(
        Opts::new("harborwatch_model_image_count", "Images currently tracked by the model")
    ).expect("Failed to create MODEL_IMAGE_COUNT");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(error) = registry.register(Box::new(MODEL_IMAGES_BY_STATUS.clone())) {
        debug!(logger, "Failed to register MODEL_IMAGES_BY_STATUS"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(MODEL_SCAN_QUEUE_LEN.clone())) {
        debug!(logger, "Failed to register MODEL_SCAN_QUEUE_LEN"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(MODEL_HUB_CHECK_QUEUE_LEN.clone())) {
        debug!(logger, "Failed to register MODEL_HUB_CHECK_QUEUE_LEN"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(MODEL_POD_COUNT.clone())) {
        debug!(logger, "Failed to register MODEL_POD_COUNT"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(MODEL_IMAGE_COUNT.clone())) {
        debug!(logger, "Failed to register MODEL_IMAGE_COUNT"; "error" => ?error);
    }
}

/// Pushes a freshly computed snapshot onto the gauges above. Called by the
/// metrics ticker once per `model_metrics_pause` (§4.2).
pub fn observe(metrics: &ModelMetrics) {
    MODEL_SCAN_QUEUE_LEN.set(metrics.scan_queue_len as f64);
    MODEL_HUB_CHECK_QUEUE_LEN.set(metrics.hub_check_queue_len as f64);
    MODEL_POD_COUNT.set(metrics.pod_count as f64);
    MODEL_IMAGE_COUNT.set(metrics.image_count as f64);
    MODEL_IMAGES_BY_STATUS.reset();
    for (status, count) in &metrics.images_by_status {
        MODEL_IMAGES_BY_STATUS
            .with_label_values(&[&format!("{:?}", status)])
            .set(*count as f64);
    }
}
