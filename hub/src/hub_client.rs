use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use failure::ResultExt;
use humthreads::Builder;
use humthreads::Thread;
use slog::debug;
use slog::Logger;

use harborwatch_model::CodeLocation;
use harborwatch_model::HubCircuitBreakerInfo;
use harborwatch_model::ModelTimings;
use harborwatch_model::ScanResults;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::CircuitBreakerConfig;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::raw::RawHubClient;
use crate::update::Update;

/// Bookkeeping for a scan this process started but the hub has not yet
/// reported as complete.
#[derive(Clone, Debug)]
struct InFlightScan {
    started_at: DateTime<Utc>,
    err: Option<String>,
}

struct CachedResult {
    fetched_at: DateTime<Utc>,
    results: ScanResults,
}

/// One hub connection's client-side state: circuit breaker, in-flight scan
/// table, scan-result cache, and the four background loops that keep them
/// current (§4.4). Owned exclusively by its own threads; every other
/// thread reaches it only through the methods below or the `Update` stream.
pub struct HubClient {
    url: String,
    in_flight: Arc<Mutex<HashMap<String, InFlightScan>>>,
    cache: Arc<Mutex<HashMap<String, CachedResult>>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    hub_version: Arc<Mutex<String>>,
    updates_rx: Receiver<Update>,
    stop_tx: Option<Sender<()>>,
    stop_rx: Receiver<()>,
    threads: Vec<Thread<()>>,
}

impl HubClient {
    /// Starts the four background loops and returns the running client.
    /// `raw` is the HTTP-free transport (§6); a real deployment would wire
    /// in an implementation backed by actual hub API calls, tests wire in
    /// `MockRawHubClient`.
    pub fn new(
        url: String,
        timings: ModelTimings,
        breaker_config: CircuitBreakerConfig,
        raw: Arc<dyn RawHubClient>,
        logger: Logger,
    ) -> Result<HubClient, Error> {
        let in_flight = Arc::new(Mutex::new(HashMap::new()));
        let cache = Arc::new(Mutex::new(HashMap::new()));
        let (updates_tx, updates_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(url.clone(), breaker_config)));
        let hub_version = Arc::new(Mutex::new(String::new()));

        let mut threads = Vec::with_capacity(4);
        threads.push(spawn_poll_completed_scans(
            url.clone(),
            timings.check_hub_for_completed_scans_pause.as_duration(),
            Arc::clone(&in_flight),
            Arc::clone(&cache),
            Arc::clone(&breaker),
            Arc::clone(&raw),
            updates_tx.clone(),
            stop_rx.clone(),
            logger.clone(),
        )?);
        threads.push(spawn_refresh_stale(
            url.clone(),
            timings.enqueue_images_for_refresh_pause.as_duration(),
            timings.refresh_threshold_duration.as_duration(),
            timings.check_hub_throttle.as_duration(),
            Arc::clone(&cache),
            Arc::clone(&breaker),
            Arc::clone(&raw),
            updates_tx.clone(),
            stop_rx.clone(),
            logger.clone(),
        )?);
        threads.push(spawn_login_keepalive(
            url.clone(),
            timings.hub_relogin_pause.as_duration(),
            Arc::clone(&breaker),
            Arc::clone(&raw),
            Arc::clone(&hub_version),
            stop_rx.clone(),
            logger.clone(),
        )?);
        threads.push(spawn_fetch_code_locations(
            url.clone(),
            timings.refresh_image_pause.as_duration(),
            Arc::clone(&in_flight),
            Arc::clone(&cache),
            Arc::clone(&breaker),
            Arc::clone(&raw),
            updates_tx,
            stop_rx.clone(),
            logger,
        )?);

        Ok(HubClient {
            url,
            in_flight,
            cache,
            breaker,
            hub_version,
            updates_rx,
            stop_tx: Some(stop_tx),
            stop_rx,
            threads,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Hub server version as last observed by the login keep-alive loop;
    /// empty until the first successful login.
    pub fn hub_version(&self) -> String {
        self.hub_version.lock().expect("HubClient::hub_version poisoned").clone()
    }

    /// Snapshot for the per-hub Prometheus gauges (`crate::metrics::observe`).
    pub fn observe_metrics(&self) {
        let breaker = self.breaker.lock().expect("HubClient::breaker poisoned");
        let in_flight = self.in_flight.lock().expect("HubClient::in_flight poisoned").len();
        let cached = self.cache.lock().expect("HubClient::cache poisoned").len();
        crate::metrics::observe(&self.url, breaker.state(), breaker.consecutive_failures(), in_flight, cached);
    }

    /// Current circuit breaker fields for the `GetModel` snapshot (§6).
    pub fn circuit_breaker_info(&self) -> HubCircuitBreakerInfo {
        let breaker = self.breaker.lock().expect("HubClient::breaker poisoned");
        HubCircuitBreakerInfo {
            state: breaker.state(),
            next_check_time: breaker.next_check_time(),
            consecutive_failures: breaker.consecutive_failures(),
        }
    }

    /// Registers that a scan for `name` was just started. Bookkeeping
    /// only, no I/O (§4.4).
    pub fn start_scan_client(&self, name: String, now: DateTime<Utc>) {
        let mut in_flight = self.in_flight.lock().expect("HubClient::in_flight poisoned");
        in_flight.insert(name, InFlightScan { started_at: now, err: None });
    }

    /// Registers that a scan-client run for `name` finished, successfully
    /// or not. Bookkeeping only; the poll-completed-scans loop is what
    /// actually removes the entry once the hub confirms completion.
    pub fn finish_scan_client(&self, name: &str, err: Option<String>) {
        let mut in_flight = self.in_flight.lock().expect("HubClient::in_flight poisoned");
        if let Some(scan) = in_flight.get_mut(name) {
            scan.err = err;
        }
    }

    /// Snapshot of cached scan results, delivered on a one-shot channel to
    /// match the original's "receiver of map[name]Scan" shape (§6). The Hub
    /// Manager's `ScanResults()` reads this synchronously per hub.
    pub fn scan_results(&self) -> Receiver<HashMap<String, ScanResults>> {
        let (tx, rx) = bounded(1);
        let cache = self.cache.lock().expect("HubClient::cache poisoned");
        let snapshot = cache.iter().map(|(name, cached)| (name.clone(), cached.results.clone())).collect();
        let _ = tx.send(snapshot);
        rx
    }

    /// Streamed events; cloned so the Hub Manager's forwarder can hold its
    /// own handle independent of this `HubClient`'s lifetime.
    pub fn updates(&self) -> Receiver<Update> {
        self.updates_rx.clone()
    }

    /// A receiver that becomes readable (with a disconnect, not a message)
    /// once `stop` has been called.
    pub fn stop_ch(&self) -> Receiver<()> {
        self.stop_rx.clone()
    }

    /// Closes the stop channel every background loop selects on, then
    /// joins them. Close-once: calling this twice is a harmless no-op the
    /// second time.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_poll_completed_scans(
    url: String,
    period: ::std::time::Duration,
    in_flight: Arc<Mutex<HashMap<String, InFlightScan>>>,
    cache: Arc<Mutex<HashMap<String, CachedResult>>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    raw: Arc<dyn RawHubClient>,
    updates: Sender<Update>,
    stop: Receiver<()>,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    Builder::new("hw:hub:poll")
        .full_name(format!("harborwatch:hub:{}:poll-completed-scans", url))
        .spawn(move |scope| {
            scope.activity("polling hub for completed scans");
            loop {
                match stop.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => (),
                    _ => break,
                }
                if scope.should_shutdown() {
                    break;
                }
                let names: Vec<String> = in_flight
                    .lock()
                    .expect("HubClient::in_flight poisoned")
                    .keys()
                    .cloned()
                    .collect();
                for name in names {
                    let code_location = CodeLocation::new(name.clone());
                    let result = {
                        let mut breaker = breaker.lock().expect("HubClient::breaker poisoned");
                        breaker.call(Utc::now(), || raw.fetch_scan_status(&code_location))
                    };
                    match result {
                        Ok(Some(results)) => {
                            in_flight.lock().expect("HubClient::in_flight poisoned").remove(&name);
                            cache.lock().expect("HubClient::cache poisoned").insert(
                                name,
                                CachedResult { fetched_at: Utc::now(), results: results.clone() },
                            );
                            let _ = updates.send(Update::ScanCompleted { code_location, results });
                        }
                        Ok(None) => (),
                        Err(error) => {
                            debug!(logger, "poll-completed-scans call failed"; "hub" => &url, "error" => %error);
                        }
                    }
                }
            }
        })
        .with_context(|_| ErrorKind::SpawnThread("hub poll-completed-scans"))
        .map_err(Error::from)
}

#[allow(clippy::too_many_arguments)]
fn spawn_refresh_stale(
    url: String,
    period: ::std::time::Duration,
    threshold: ::std::time::Duration,
    throttle: ::std::time::Duration,
    cache: Arc<Mutex<HashMap<String, CachedResult>>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    raw: Arc<dyn RawHubClient>,
    updates: Sender<Update>,
    stop: Receiver<()>,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    Builder::new("hw:hub:refresh")
        .full_name(format!("harborwatch:hub:{}:refresh-stale", url))
        .spawn(move |scope| {
            scope.activity("refreshing stale cached scan results");
            loop {
                match stop.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => (),
                    _ => break,
                }
                if scope.should_shutdown() {
                    break;
                }
                let now = Utc::now();
                let stalest = {
                    let cache = cache.lock().expect("HubClient::cache poisoned");
                    cache
                        .iter()
                        .filter(|(_, cached)| {
                            now.signed_duration_since(cached.fetched_at)
                                .to_std()
                                .map(|elapsed| elapsed > threshold)
                                .unwrap_or(false)
                        })
                        .min_by_key(|(_, cached)| cached.fetched_at)
                        .map(|(name, _)| name.clone())
                };
                let name = match stalest {
                    Some(name) => name,
                    None => continue,
                };
                let code_location = CodeLocation::new(name.clone());
                let result = {
                    let mut breaker = breaker.lock().expect("HubClient::breaker poisoned");
                    breaker.call(now, || raw.fetch_scan_status(&code_location))
                };
                match result {
                    Ok(Some(results)) => {
                        cache.lock().expect("HubClient::cache poisoned").insert(
                            name,
                            CachedResult { fetched_at: Utc::now(), results: results.clone() },
                        );
                        let _ = updates.send(Update::ScanCompleted { code_location, results });
                    }
                    Ok(None) => {
                        cache.lock().expect("HubClient::cache poisoned").remove(&name);
                    }
                    Err(error) => {
                        debug!(logger, "refresh-stale call failed"; "hub" => &url, "error" => %error);
                    }
                }
                let _activity = scope.scoped_activity("throttling after a refresh call");
                ::std::thread::sleep(throttle);
            }
        })
        .with_context(|_| ErrorKind::SpawnThread("hub refresh-stale"))
        .map_err(Error::from)
}

fn spawn_login_keepalive(
    url: String,
    period: ::std::time::Duration,
    breaker: Arc<Mutex<CircuitBreaker>>,
    raw: Arc<dyn RawHubClient>,
    hub_version: Arc<Mutex<String>>,
    stop: Receiver<()>,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    Builder::new("hw:hub:login")
        .full_name(format!("harborwatch:hub:{}:login-keepalive", url))
        .spawn(move |scope| {
            scope.activity("maintaining hub session");
            loop {
                match stop.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => (),
                    _ => break,
                }
                if scope.should_shutdown() {
                    break;
                }
                let result = {
                    let mut breaker = breaker.lock().expect("HubClient::breaker poisoned");
                    breaker.call(Utc::now(), || raw.login())
                };
                match result {
                    Ok(()) => match raw.hub_version() {
                        Ok(version) => *hub_version.lock().expect("HubClient::hub_version poisoned") = version,
                        Err(error) => debug!(logger, "hub version lookup failed"; "hub" => &url, "error" => %error),
                    },
                    Err(error) => {
                        debug!(logger, "hub login failed"; "hub" => &url, "error" => %error);
                    }
                }
            }
        })
        .with_context(|_| ErrorKind::SpawnThread("hub login-keepalive"))
        .map_err(Error::from)
}

#[allow(clippy::too_many_arguments)]
fn spawn_fetch_code_locations(
    url: String,
    period: ::std::time::Duration,
    in_flight: Arc<Mutex<HashMap<String, InFlightScan>>>,
    cache: Arc<Mutex<HashMap<String, CachedResult>>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    raw: Arc<dyn RawHubClient>,
    updates: Sender<Update>,
    stop: Receiver<()>,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    Builder::new("hw:hub:codeloc")
        .full_name(format!("harborwatch:hub:{}:fetch-code-locations", url))
        .spawn(move |scope| {
            scope.activity("diffing hub code locations against known scans");
            loop {
                match stop.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => (),
                    _ => break,
                }
                if scope.should_shutdown() {
                    break;
                }
                let result = {
                    let mut breaker = breaker.lock().expect("HubClient::breaker poisoned");
                    breaker.call(Utc::now(), || raw.fetch_code_locations())
                };
                let known = match result {
                    Ok(known) => known,
                    Err(error) => {
                        debug!(logger, "fetch-code-locations call failed"; "hub" => &url, "error" => %error);
                        continue;
                    }
                };
                for code_location in known {
                    let name = code_location.as_str().to_string();
                    let already_tracked = in_flight.lock().expect("HubClient::in_flight poisoned").contains_key(&name)
                        || cache.lock().expect("HubClient::cache poisoned").contains_key(&name);
                    if !already_tracked {
                        let _ = updates.send(Update::CodeLocationDiscovered { code_location });
                    }
                }
            }
        })
        .with_context(|_| ErrorKind::SpawnThread("hub fetch-code-locations"))
        .map_err(Error::from)
}
