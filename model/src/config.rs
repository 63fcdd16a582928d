use std::time::Duration;

use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Core configuration consumed by the Model and Reducer.
///
/// This intentionally mirrors the fields of the original `ModelConfig`
/// (hub host/port/user, the process' own port, log level, concurrent scan
/// limit) rather than adding a richer config surface here: the full
/// application configuration (including per-hub credentials) lives in the
/// `harborwatch` binary crate and is translated into this struct.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub hub_host: String,

    #[serde(default)]
    pub hub_user: String,

    #[serde(default)]
    pub hub_port: u16,

    #[serde(default)]
    pub port: u16,

    #[serde(default = "ModelConfig::default_log_level")]
    pub log_level: String,

    #[serde(default = "ModelConfig::default_concurrent_scan_limit")]
    pub concurrent_scan_limit: usize,
}

impl ModelConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_concurrent_scan_limit() -> usize {
        2
    }
}

impl Default for ModelConfig {
    fn default() -> ModelConfig {
        ModelConfig {
            hub_host: String::new(),
            hub_user: String::new(),
            hub_port: 443,
            port: 3001,
            log_level: ModelConfig::default_log_level(),
            concurrent_scan_limit: ModelConfig::default_concurrent_scan_limit(),
        }
    }
}

/// A duration rendered as the `{Minutes, Seconds, Milliseconds}` triplet the
/// `GetModel` snapshot format requires (§6), alongside the `Duration` used
/// internally by timers.
///
/// `duration` is skipped by `Serialize` (only the triplet goes over the
/// wire) and rebuilt from `milliseconds` by a hand-written `Deserialize`
/// below, rather than defaulted to zero, so a deserialised `ModelTime`
/// round-trips equal to the one that was serialised and `as_duration()`
/// still returns the right value afterwards.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize)]
pub struct ModelTime {
    #[serde(skip)]
    duration: Duration,
    pub minutes: u64,
    pub seconds: u64,
    pub milliseconds: u64,
}

impl ModelTime {
    pub fn from_secs(secs: u64) -> ModelTime {
        ModelTime::new(Duration::from_secs(secs))
    }

    pub fn new(duration: Duration) -> ModelTime {
        let millis = duration.as_millis() as u64;
        ModelTime {
            duration,
            minutes: millis / 60_000,
            seconds: millis / 1_000,
            milliseconds: millis,
        }
    }

    pub fn as_duration(self) -> Duration {
        self.duration
    }
}

impl<'de> serde::Deserialize<'de> for ModelTime {
    fn deserialize<D>(deserializer: D) -> Result<ModelTime, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            milliseconds: u64,
        }
        let raw = <Raw as serde::Deserialize>::deserialize(deserializer)?;
        Ok(ModelTime::new(Duration::from_millis(raw.milliseconds)))
    }
}

impl Default for ModelTime {
    fn default() -> ModelTime {
        ModelTime::new(Duration::from_secs(0))
    }
}

/// The ten named durations that tune every periodic loop in the system.
///
/// Every field is optional at the YAML layer (see `harborwatch`'s
/// `TimingsConfig`) and defaults per the original implementation's
/// `hub.DefaultTimings`.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ModelTimings {
    pub hub_client_timeout: ModelTime,
    pub check_hub_for_completed_scans_pause: ModelTime,
    pub check_hub_throttle: ModelTime,
    pub check_for_stalled_scans_pause: ModelTime,
    pub stalled_scan_client_timeout: ModelTime,
    pub refresh_image_pause: ModelTime,
    pub enqueue_images_for_refresh_pause: ModelTime,
    pub refresh_threshold_duration: ModelTime,
    pub model_metrics_pause: ModelTime,
    pub hub_relogin_pause: ModelTime,
}

impl Default for ModelTimings {
    fn default() -> ModelTimings {
        ModelTimings {
            hub_client_timeout: ModelTime::from_secs(120),
            check_hub_for_completed_scans_pause: ModelTime::from_secs(20),
            check_hub_throttle: ModelTime::from_secs(1),
            check_for_stalled_scans_pause: ModelTime::from_secs(60),
            stalled_scan_client_timeout: ModelTime::from_secs(600),
            refresh_image_pause: ModelTime::from_secs(60),
            enqueue_images_for_refresh_pause: ModelTime::from_secs(30),
            refresh_threshold_duration: ModelTime::from_secs(6 * 3600),
            model_metrics_pause: ModelTime::from_secs(15),
            hub_relogin_pause: ModelTime::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ModelTime;
    use std::time::Duration;

    #[test]
    fn model_time_breaks_down_duration() {
        let time = ModelTime::new(Duration::from_millis(65_432));
        assert_eq!(time.minutes, 1);
        assert_eq!(time.seconds, 65);
        assert_eq!(time.milliseconds, 65_432);
    }
}
