use serde_derive::Deserialize;
use serde_derive::Serialize;

use harborwatch_model::ModelTime;

/// Connection details for one hub, passed to the `newHub`-equivalent
/// factory (§6). `scheme`/`host`/`port` are taken as given: the only
/// validation performed is the §6 compatibility warning for a host that
/// already looks like a URL (checked by `HubConfig::looks_like_url`).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
    #[serde(default = "HubConfig::default_scheme")]
    pub scheme: String,

    pub host: String,

    #[serde(default = "HubConfig::default_port")]
    pub port: u16,

    pub user: String,

    pub password: String,

    #[serde(default = "HubConfig::default_concurrent_scan_limit")]
    pub concurrent_scan_limit: usize,
}

impl HubConfig {
    fn default_scheme() -> String {
        "https".to_string()
    }

    fn default_port() -> u16 {
        443
    }

    fn default_concurrent_scan_limit() -> usize {
        2
    }

    /// §6 compatibility check: a host already carrying a scheme or port
    /// suffix is accepted but should be flagged to the operator.
    pub fn looks_like_url(&self) -> bool {
        self.host.contains("http") || self.host.contains("://") || self.host.contains(':')
    }
}

impl Default for HubConfig {
    fn default() -> HubConfig {
        HubConfig {
            scheme: HubConfig::default_scheme(),
            host: String::new(),
            port: HubConfig::default_port(),
            user: String::new(),
            password: String::new(),
            concurrent_scan_limit: HubConfig::default_concurrent_scan_limit(),
        }
    }
}

/// Tunables for the per-hub circuit breaker (§4.4). Not part of the
/// original's `ModelTimings` ten, so kept alongside `HubConfig` instead of
/// in `harborwatch_model`.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    #[serde(default = "CircuitBreakerConfig::default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "CircuitBreakerConfig::default_backoff")]
    pub backoff: ModelTime,
}

impl CircuitBreakerConfig {
    fn default_failure_threshold() -> u32 {
        5
    }

    fn default_backoff() -> ModelTime {
        ModelTime::from_secs(30)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: CircuitBreakerConfig::default_failure_threshold(),
            backoff: CircuitBreakerConfig::default_backoff(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HubConfig;

    fn fresh(host: &str) -> HubConfig {
        HubConfig {
            scheme: HubConfig::default_scheme(),
            host: host.to_string(),
            port: HubConfig::default_port(),
            user: "sysadmin".to_string(),
            password: "blackduck".to_string(),
            concurrent_scan_limit: HubConfig::default_concurrent_scan_limit(),
        }
    }

    #[test]
    fn plain_host_is_not_flagged() {
        assert!(!fresh("hub.internal.example.com").looks_like_url());
    }

    #[test]
    fn scheme_prefixed_host_is_flagged() {
        assert!(fresh("https://hub.internal.example.com").looks_like_url());
    }

    #[test]
    fn port_suffixed_host_is_flagged() {
        assert!(fresh("hub.internal.example.com:8443").looks_like_url());
    }
}
