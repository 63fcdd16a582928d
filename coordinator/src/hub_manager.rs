use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use failure::Fail;
use failure::ResultExt;
use humthreads::Builder;
use humthreads::Thread;
use slog::debug;
use slog::error;
use slog::Logger;

use harborwatch_hub::CircuitBreakerConfig;
use harborwatch_hub::HubCircuitBreakerInfo;
use harborwatch_hub::HubClient;
use harborwatch_hub::HubConfig;
use harborwatch_hub::RawHubClient;
use harborwatch_hub::ScanClient;
use harborwatch_hub::ScanJob;
use harborwatch_hub::Update;
use harborwatch_model::ModelTimings;
use harborwatch_model::ScanResults;

use crate::error::Error;
use crate::error::ErrorKind;

/// An `Update` tagged with the URL of the hub that emitted it (§4.5).
#[derive(Clone, Debug)]
pub struct TaggedUpdate {
    pub hub_url: String,
    pub update: Update,
}

struct HubEntry {
    client: HubClient,
    forwarder: Thread<()>,
}

/// Builds the `RawHubClient` a new `HubClient` should be layered on top of.
/// Injected so tests can wire in `MockRawHubClient` while a real deployment
/// would wire in the actual HTTP transport (out of scope here, per §1).
pub type RawClientFactory = Box<dyn Fn(&str, &HubConfig) -> Arc<dyn RawHubClient> + Send>;

/// Registry of running `HubClient`s plus the fan-in of their `Update`
/// streams (§4.5). `set_hubs` is the only mutator; it is not safe to call
/// concurrently with itself, matching the "externally serialised" contract.
pub struct HubManager {
    hubs: HashMap<String, HubEntry>,
    timings: ModelTimings,
    breaker_config: CircuitBreakerConfig,
    raw_factory: RawClientFactory,
    merged_tx: Sender<TaggedUpdate>,
    merged_rx: Receiver<TaggedUpdate>,
    logger: Logger,
}

impl HubManager {
    pub fn new(
        timings: ModelTimings,
        breaker_config: CircuitBreakerConfig,
        raw_factory: RawClientFactory,
        logger: Logger,
    ) -> HubManager {
        let (merged_tx, merged_rx) = unbounded();
        HubManager { hubs: HashMap::new(), timings, breaker_config, raw_factory, merged_tx, merged_rx, logger }
    }

    /// Reconciles the registry against `desired`: creates a `HubClient` for
    /// every new URL, stops and removes every URL no longer present.
    /// Creation failures are logged and left for the next call to retry —
    /// they never block or fail this call (§4.5). `start_hub` itself runs
    /// on this call's thread rather than a spawned one: it does no network
    /// I/O, only spawning the four background loops that do (see
    /// `DESIGN.md`'s note on why that satisfies the spec's "asynchronously"
    /// wording without a second thread).
    pub fn set_hubs(&mut self, desired: HashMap<String, HubConfig>) {
        let gone: Vec<String> =
            self.hubs.keys().filter(|url| !desired.contains_key(url.as_str())).cloned().collect();
        for url in gone {
            if let Some(mut entry) = self.hubs.remove(&url) {
                entry.client.stop();
                let _ = entry.forwarder.join();
                debug!(self.logger, "stopped hub client"; "hub" => %url);
            }
        }

        for (url, config) in desired {
            if self.hubs.contains_key(&url) {
                continue;
            }
            match self.start_hub(url.clone(), config) {
                Ok(entry) => {
                    self.hubs.insert(url, entry);
                }
                Err(error) => {
                    error!(self.logger, "failed to start hub client, will retry"; "hub" => %url, "error" => %error);
                }
            }
        }
    }

    fn start_hub(&self, url: String, config: HubConfig) -> Result<HubEntry, Error> {
        let raw = (self.raw_factory)(&url, &config);
        let client = HubClient::new(url.clone(), self.timings, self.breaker_config, raw, self.logger.clone())
            .map_err(|error| error.context(ErrorKind::SpawnThread("hub client")))?;
        let updates = client.updates();
        let merged_tx = self.merged_tx.clone();
        let forward_url = url.clone();
        let forwarder = Builder::new("hw:coord:fwd")
            .full_name(format!("harborwatch:coordinator:forwarder:{}", url))
            .spawn(move |_scope| {
                for update in updates.iter() {
                    if merged_tx.send(TaggedUpdate { hub_url: forward_url.clone(), update }).is_err() {
                        break;
                    }
                }
            })
            .with_context(|_| ErrorKind::SpawnThread("hub forwarder"))?;
        Ok(HubEntry { client, forwarder })
    }

    /// Registers that a scan for `job` was just started against `hub_url`'s
    /// client, and hands the job to `scan_client`. Bookkeeping plus the
    /// scan-client hand-off live together here since both happen at the
    /// moment an image leaves the scan queue.
    pub fn start_scan(
        &self,
        hub_url: &str,
        job: ScanJob,
        now: chrono::DateTime<chrono::Utc>,
        scan_client: &dyn ScanClient,
    ) -> Result<(), Error> {
        let entry = self.hubs.get(hub_url).ok_or_else(|| ErrorKind::NotFound(hub_url.to_string()))?;
        let image_name = job.image_name.clone();
        entry.client.start_scan_client(image_name.clone(), now);
        scan_client.scan(job).map_err(|error| {
            entry.client.finish_scan_client(&image_name, Some(error.to_string()));
            ErrorKind::ScanDispatch(hub_url.to_string(), error.to_string())
        })?;
        Ok(())
    }

    /// Gathers a per-hub map of cached scan results by reading each hub's
    /// `scan_results()` channel synchronously (§4.5). A stalled hub stalls
    /// this call; do not invoke it from the Reducer thread.
    pub fn scan_results(&self) -> HashMap<String, HashMap<String, ScanResults>> {
        let mut gathered = HashMap::with_capacity(self.hubs.len());
        for (url, entry) in &self.hubs {
            if let Ok(results) = entry.client.scan_results().recv() {
                gathered.insert(url.clone(), results);
            }
        }
        gathered
    }

    /// The merged `Update` stream every registered hub's forwarder feeds.
    pub fn updates(&self) -> Receiver<TaggedUpdate> {
        self.merged_rx.clone()
    }

    /// Circuit breaker fields for one hub, or the default (enabled, no
    /// failures) if it is not currently registered. Used to populate the
    /// singular `HubCircuitBreaker` field of the `GetModel` snapshot (§6);
    /// see `DESIGN.md` for why that field names one hub rather than a map.
    pub fn circuit_breaker_info(&self, hub_url: &str) -> HubCircuitBreakerInfo {
        self.hubs.get(hub_url).map(|entry| entry.client.circuit_breaker_info()).unwrap_or_default()
    }

    /// Hub version reported by `hub_url`'s login keep-alive loop, if it is
    /// currently registered.
    pub fn hub_version(&self, hub_url: &str) -> Option<String> {
        self.hubs.get(hub_url).map(|entry| entry.client.hub_version())
    }

    /// Pushes every registered hub client's circuit-breaker/queue-depth
    /// gauges into its Prometheus metrics. Meant to be called from a
    /// periodic ticker, not the hot path.
    pub fn observe_metrics(&self) {
        for entry in self.hubs.values() {
            entry.client.observe_metrics();
        }
    }

    /// Stops every registered hub client and joins its forwarder. Called on
    /// process shutdown.
    pub fn stop_all(&mut self) {
        let urls: Vec<String> = self.hubs.keys().cloned().collect();
        for url in urls {
            if let Some(mut entry) = self.hubs.remove(&url) {
                entry.client.stop();
                let _ = entry.forwarder.join();
            }
        }
    }
}

impl Drop for HubManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use harborwatch_hub::MockRawHubClient;

    use super::*;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn fast_timings() -> ModelTimings {
        let mut timings = ModelTimings::default();
        timings.hub_relogin_pause = harborwatch_model::ModelTime::from_secs(3600);
        timings.check_hub_for_completed_scans_pause = harborwatch_model::ModelTime::from_secs(3600);
        timings.enqueue_images_for_refresh_pause = harborwatch_model::ModelTime::from_secs(3600);
        timings.refresh_image_pause = harborwatch_model::ModelTime::from_secs(3600);
        timings
    }

    fn mock_factory() -> RawClientFactory {
        Box::new(|_url: &str, _config: &HubConfig| -> Arc<dyn RawHubClient> {
            Arc::new(MockRawHubClient::new("1.0.0"))
        })
    }

    fn hub_config() -> HubConfig {
        HubConfig {
            scheme: "https".to_string(),
            host: "hub-a.internal".to_string(),
            port: 443,
            user: "sysadmin".to_string(),
            password: "blackduck".to_string(),
            concurrent_scan_limit: 2,
        }
    }

    #[test]
    fn set_hubs_creates_and_removes() {
        let mut manager =
            HubManager::new(fast_timings(), CircuitBreakerConfig::default(), mock_factory(), logger());
        let mut desired = HashMap::new();
        desired.insert("hub-a".to_string(), hub_config());
        manager.set_hubs(desired);
        assert_eq!(manager.hubs.len(), 1);

        manager.set_hubs(HashMap::new());
        assert!(manager.hubs.is_empty());
    }

    #[test]
    fn set_hubs_is_idempotent_for_unchanged_urls() {
        let mut manager =
            HubManager::new(fast_timings(), CircuitBreakerConfig::default(), mock_factory(), logger());
        let mut desired = HashMap::new();
        desired.insert("hub-a".to_string(), hub_config());
        manager.set_hubs(desired.clone());
        manager.set_hubs(desired);
        assert_eq!(manager.hubs.len(), 1);
    }

    #[test]
    fn circuit_breaker_info_defaults_when_hub_unknown() {
        let manager = HubManager::new(fast_timings(), CircuitBreakerConfig::default(), mock_factory(), logger());
        let info = manager.circuit_breaker_info("missing");
        assert_eq!(info.state, harborwatch_model::CircuitBreakerState::Enabled);
        assert_eq!(info.consecutive_failures, 0);
    }

    #[test]
    fn scan_results_is_empty_for_a_freshly_registered_hub() {
        let mut manager =
            HubManager::new(fast_timings(), CircuitBreakerConfig::default(), mock_factory(), logger());
        let mut desired = HashMap::new();
        desired.insert("hub-a".to_string(), hub_config());
        manager.set_hubs(desired);
        let results = manager.scan_results();
        assert_eq!(results.get("hub-a").map(|by_name| by_name.len()), Some(0));
    }
}
