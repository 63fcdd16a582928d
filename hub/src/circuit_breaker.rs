use chrono::DateTime;
use chrono::Utc;

use harborwatch_model::CircuitBreakerState;

use crate::config::CircuitBreakerConfig;
use crate::error::Error;
use crate::error::ErrorKind;

/// `chrono::Duration::from_std` only fails for durations too large to fit
/// a signed 64-bit millisecond count; backoff values never come close.
fn chrono_duration(duration: ::std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).expect("backoff duration out of range")
}

/// Gates every outbound call a `HubClient` makes to its remote hub (§4.4).
///
/// `Enabled` lets calls through and counts failures; past the configured
/// threshold it trips to `Disabled` for `backoff`, then allows exactly one
/// probe call (`CheckingHealth`) to decide whether to re-`Enable` or trip
/// again with a pushed-out `NextCheckTime`.
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    next_check_time: Option<DateTime<Utc>>,
    config: CircuitBreakerConfig,
    hub: String,
}

impl CircuitBreaker {
    pub fn new(hub: String, config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker {
            state: CircuitBreakerState::Enabled,
            consecutive_failures: 0,
            next_check_time: None,
            config,
            hub,
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_check_time(&self) -> Option<DateTime<Utc>> {
        self.next_check_time
    }

    /// Runs `call` through the breaker, per the §4.4 state table. `now` is
    /// passed in rather than read internally so tests can drive the clock.
    pub fn call<F, T>(&mut self, now: DateTime<Utc>, call: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        match self.state {
            CircuitBreakerState::Disabled => {
                if self.next_check_time.map(|at| now < at).unwrap_or(true) {
                    return Err(ErrorKind::CircuitOpen(self.hub.clone()).into());
                }
                self.state = CircuitBreakerState::CheckingHealth;
                self.probe(now, call)
            }
            CircuitBreakerState::CheckingHealth => self.probe(now, call),
            CircuitBreakerState::Enabled => match call() {
                Ok(value) => Ok(value),
                Err(error) => {
                    self.record_failure(now);
                    Err(error)
                }
            },
        }
    }

    fn probe<F, T>(&mut self, now: DateTime<Utc>, call: F) -> Result<T, Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        match call() {
            Ok(value) => {
                self.state = CircuitBreakerState::Enabled;
                self.consecutive_failures = 0;
                self.next_check_time = None;
                Ok(value)
            }
            Err(error) => {
                self.next_check_time = Some(now + chrono_duration(self.config.backoff.as_duration()));
                self.state = CircuitBreakerState::Disabled;
                Err(error)
            }
        }
    }

    fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.failure_threshold {
            self.state = CircuitBreakerState::Disabled;
            self.next_check_time = Some(now + chrono_duration(self.config.backoff.as_duration()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn fresh() -> CircuitBreaker {
        CircuitBreaker::new("hub-a".to_string(), CircuitBreakerConfig { failure_threshold: 2, ..Default::default() })
    }

    #[test]
    fn trips_after_threshold_failures() {
        let mut breaker = fresh();
        assert!(breaker.call(now(), || Err(ErrorKind::Backend("hub-a".into(), "boom".into()).into())).is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Enabled);
        assert!(breaker.call(now(), || Err(ErrorKind::Backend("hub-a".into(), "boom".into()).into())).is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Disabled);
    }

    #[test]
    fn short_circuits_while_disabled() {
        let mut breaker = fresh();
        for _ in 0..2 {
            let _ = breaker.call(now(), || Err(ErrorKind::Backend("hub-a".into(), "boom".into()).into()));
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Disabled);
        let result: Result<(), Error> = breaker.call(now(), || Ok(()));
        assert!(matches!(result.unwrap_err().kind(), ErrorKind::CircuitOpen(_)));
    }

    #[test]
    fn recovers_after_backoff_on_successful_probe() {
        let mut breaker = fresh();
        for _ in 0..2 {
            let _ = breaker.call(now(), || Err(ErrorKind::Backend("hub-a".into(), "boom".into()).into()));
        }
        let later = now() + chrono::Duration::seconds(breaker.config.backoff.as_duration().as_secs() as i64 + 1);
        let result: Result<(), Error> = breaker.call(later, || Ok(()));
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitBreakerState::Enabled);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn stays_disabled_on_failed_probe() {
        let mut breaker = fresh();
        for _ in 0..2 {
            let _ = breaker.call(now(), || Err(ErrorKind::Backend("hub-a".into(), "boom".into()).into()));
        }
        let later = now() + chrono::Duration::seconds(breaker.config.backoff.as_duration().as_secs() as i64 + 1);
        let result: Result<(), Error> = breaker.call(later, || Err(ErrorKind::Backend("hub-a".into(), "boom".into()).into()));
        assert!(result.is_err());
        assert_eq!(breaker.state(), CircuitBreakerState::Disabled);
    }
}
