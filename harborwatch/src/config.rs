use std::fs::File;
use std::io::Read;
use std::path::Path;

use failure::ResultExt;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use harborwatch_hub::CircuitBreakerConfig;
use harborwatch_hub::HubConfig;
use harborwatch_model::ModelConfig;
use harborwatch_model::ModelTimings;

use crate::error::ErrorKind;
use crate::error::Result;
use crate::logging::LoggingConfig;

/// Top-level process configuration (§6).
///
/// Unlike the original's flat `ModelConfig`, hub connection details live in
/// their own `HubConfig` section rather than being duplicated across two
/// structs; `to_model_config` flattens the two back together for the
/// Model/Reducer layer, which only knows about the original shape.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default = "Config::default_port")]
    pub port: u16,

    #[serde(default = "Config::default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub timings: ModelTimings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    fn default_port() -> u16 {
        3001
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Loads the configuration from a YAML file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let file = File::open(path).with_context(|_| ErrorKind::ConfigLoad)?;
        Config::from_reader(file)
    }

    /// Loads the configuration from any `Read`, mainly for tests.
    pub fn from_reader<R: Read>(reader: R) -> Result<Config> {
        let config = serde_yaml::from_reader(reader).with_context(|_| ErrorKind::ConfigLoad)?;
        Ok(config)
    }

    /// Derives the `ModelConfig` the Model/Reducer layer expects from this
    /// richer configuration (§6).
    pub fn to_model_config(&self) -> ModelConfig {
        ModelConfig {
            hub_host: self.hub.host.clone(),
            hub_user: self.hub.user.clone(),
            hub_port: self.hub.port,
            port: self.port,
            log_level: self.log_level.clone(),
            concurrent_scan_limit: self.hub.concurrent_scan_limit,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            hub: HubConfig::default(),
            port: Config::default_port(),
            log_level: Config::default_log_level(),
            timings: ModelTimings::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::Config;

    #[test]
    fn from_reader_error() {
        let cursor = Cursor::new("not: [valid, yaml for this struct");
        match Config::from_reader(cursor) {
            Err(_) => (),
            Ok(_) => panic!("unexpected success"),
        }
    }

    #[test]
    fn from_reader_ok() {
        let cursor = Cursor::new(
            "hub:\n  host: hub.internal\n  user: sysadmin\n  password: blackduck\nport: 3001\n",
        );
        let config = Config::from_reader(cursor).unwrap();
        assert_eq!(config.hub.host, "hub.internal");
        assert_eq!(config.port, 3001);
    }

    #[test]
    fn to_model_config_flattens_hub_fields() {
        let mut config = Config::default();
        config.hub.host = "hub.internal".to_string();
        config.hub.user = "sysadmin".to_string();
        let model_config = config.to_model_config();
        assert_eq!(model_config.hub_host, "hub.internal");
        assert_eq!(model_config.hub_user, "sysadmin");
        assert_eq!(model_config.hub_port, config.hub.port);
    }
}
