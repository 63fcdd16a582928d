use std::io::stdout;
use std::sync::Mutex;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use slog::Drain;
use slog::IgnoreResult;
use slog::Logger;
use slog::Never;
use slog::SendSyncRefUnwindSafeDrain;
use slog::SendSyncUnwindSafeDrain;
use slog_async::Async;
use slog_json::Json;

/// Possible logging levels, serialised as the lowercase name.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub enum LoggingLevel {
    #[serde(rename = "critical")]
    Critical,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "debug")]
    Debug,
}

impl Default for LoggingLevel {
    fn default() -> LoggingLevel {
        LoggingLevel::Info
    }
}

impl From<LoggingLevel> for slog::Level {
    fn from(level: LoggingLevel) -> Self {
        match level {
            LoggingLevel::Critical => slog::Level::Critical,
            LoggingLevel::Error => slog::Level::Error,
            LoggingLevel::Warning => slog::Level::Warning,
            LoggingLevel::Info => slog::Level::Info,
            LoggingLevel::Debug => slog::Level::Debug,
        }
    }
}

/// Logging configuration options.
///
/// Only the JSON-to-stdout drain is supported (no journald feature, unlike
/// the teacher): this process is expected to run under a container
/// scheduler that collects stdout, matching the original's deployment
/// model.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Flush logs asynchronously. Named `async_drain` rather than `async`
    /// since the latter is a reserved word in this edition.
    #[serde(default = "LoggingConfig::default_async_drain")]
    pub async_drain: bool,

    #[serde(default)]
    pub level: LoggingLevel,
}

impl LoggingConfig {
    fn default_async_drain() -> bool {
        true
    }
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig { async_drain: LoggingConfig::default_async_drain(), level: LoggingLevel::default() }
    }
}

/// Alternative implementation of slog's `LevelFilter` with `Ok == ()`, so it
/// can be composed underneath `Async` without boxing.
struct LevelFilter<D: Drain>(D, slog::Level);

impl<D: Drain> Drain for LevelFilter<D> {
    type Ok = ();
    type Err = D::Err;

    fn log(&self, record: &slog::Record, logger_values: &slog::OwnedKVList) -> Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, logger_values)?;
        }
        Ok(())
    }
}

fn into_logger<D>(drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never> + 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    Logger::root(drain, slog::o!("version" => env!("CARGO_PKG_VERSION")))
}

fn config_async<D>(config: &LoggingConfig, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never> + 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    if config.async_drain {
        into_logger(Async::new(drain).build().ignore_res())
    } else {
        into_logger(drain)
    }
}

fn config_level<D>(config: &LoggingConfig, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never> + 'static + SendSyncRefUnwindSafeDrain<Ok = (), Err = Never>,
{
    let drain = LevelFilter(drain, config.level.clone().into());
    config_async(config, drain)
}

/// Builds a `Logger` from the loaded configuration.
pub fn configure(config: &LoggingConfig) -> Logger {
    let drain = Mutex::new(Json::default(stdout())).map(IgnoreResult::new);
    config_level(config, drain)
}

/// A fixed `Logger` usable before configuration has been loaded, so the
/// config-loading step itself can log.
pub fn starter() -> Logger {
    let drain = Mutex::new(Json::default(stdout())).map(IgnoreResult::new);
    into_logger(drain)
}
