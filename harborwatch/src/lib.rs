use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use clap::App;
use clap::Arg;
use failure::ResultExt;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;

use harborwatch_coordinator::HubManager;
use harborwatch_coordinator::RawClientFactory;
use harborwatch_hub::MockRawHubClient;
use harborwatch_hub::MockScanClient;
use harborwatch_hub::RawHubClient;
use harborwatch_hub::ScanClient;
use harborwatch_hub::ScanJob;
use harborwatch_hub::Update;
use harborwatch_model::CodeLocation;
use harborwatch_model::Digest;
use harborwatch_model::Model;
use harborwatch_model::Reducer;
use prometheus::Registry;

mod config;
mod error;
pub mod logging;

pub use self::config::Config;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::logging::LoggingConfig;

/// Hub project every code location is registered under. The original does
/// not expose a separate "project" concept distinct from the one hub this
/// process talks to, so a single fixed name is used rather than adding a
/// config field nothing else in the system needs.
const PROJECT_NAME: &str = "harborwatch";

/// Builds the `RawHubClient` a new hub connection is layered on top of.
///
/// The real HTTP transport is out of scope (§1); this wires in the
/// in-memory mock so the process is runnable end-to-end against nothing
/// but itself, matching how the Hub Client and Hub Manager are already
/// tested against `MockRawHubClient` throughout this workspace.
fn raw_client_factory() -> RawClientFactory {
    Box::new(|_url: &str, _config: &harborwatch_hub::HubConfig| -> Arc<dyn RawHubClient> {
        Arc::new(MockRawHubClient::new(env!("CARGO_PKG_VERSION")))
    })
}

/// Runs the scan-dispatch loop: pulls images off the scan queue and hands
/// them to the scan client through the primary hub's client.
fn run_scan_dispatch(
    submitter: harborwatch_model::ActionSubmitter,
    hub_manager: Arc<Mutex<HubManager>>,
    hub_url: String,
    scan_client: Arc<dyn ScanClient>,
    name_to_sha: Arc<Mutex<HashMap<String, Digest>>>,
    period: ::std::time::Duration,
    logger: Logger,
) -> harborwatch_model::Result<humthreads::Thread<()>> {
    harborwatch_model::spawn_ticker(
        "hw:scan-dispatch",
        "harborwatch:scan-dispatch",
        period,
        logger.clone(),
        move || {
            let image = match submitter.get_next_image_from_scan_queue() {
                Ok(Some(image)) => image,
                Ok(None) => return,
                Err(error) => {
                    debug!(logger, "failed to poll scan queue"; "error" => %error);
                    return;
                }
            };
            let image_name = image.names[0].clone();
            let code_location = CodeLocation::for_image_name(PROJECT_NAME, &image_name);
            name_to_sha
                .lock()
                .expect("name_to_sha poisoned")
                .insert(code_location.as_str().to_string(), image.sha.clone());
            let job = ScanJob::new(PROJECT_NAME, image_name, image.sha.clone());
            let manager = hub_manager.lock().expect("hub_manager poisoned");
            let dispatched = manager.start_scan(&hub_url, job, chrono::Utc::now(), scan_client.as_ref());
            drop(manager);
            match dispatched {
                Ok(()) => {
                    // Upload succeeded: RunningScanClient -> RunningHubScan. Completion
                    // is later recorded by `run_update_consumer` via `did_fetch_scan_results`.
                    let _ = submitter.finish_running_scan_client(image.sha.clone(), false);
                }
                Err(error) => {
                    debug!(logger, "scan dispatch failed, will retry"; "image" => %image.sha, "error" => %error);
                    let _ = submitter.finish_running_scan_client(image.sha.clone(), true);
                }
            }
        },
    )
}

/// Runs the hub-check dispatch loop: pulls images off the hub-check queue
/// and decides, from the primary hub's cached results, whether the hub has
/// already scanned them (adoption) or they need scanning.
fn run_hub_check_dispatch(
    submitter: harborwatch_model::ActionSubmitter,
    hub_manager: Arc<Mutex<HubManager>>,
    hub_url: String,
    period: ::std::time::Duration,
    logger: Logger,
) -> harborwatch_model::Result<humthreads::Thread<()>> {
    harborwatch_model::spawn_ticker(
        "hw:hub-check",
        "harborwatch:hub-check-dispatch",
        period,
        logger.clone(),
        move || {
            let image = match submitter.get_next_image_from_hub_check_queue() {
                Ok(Some(image)) => image,
                Ok(None) => return,
                Err(error) => {
                    debug!(logger, "failed to poll hub-check queue"; "error" => %error);
                    return;
                }
            };
            let code_location = CodeLocation::for_image_name(PROJECT_NAME, &image.names[0]);
            let cached = {
                let manager = hub_manager.lock().expect("hub_manager poisoned");
                manager.scan_results().remove(&hub_url).and_then(|by_name| {
                    by_name.get(code_location.as_str()).cloned()
                })
            };
            let result = match cached {
                Some(results) => submitter.did_fetch_scan_results(image.sha.clone(), results),
                None => submitter
                    .set_scan_status(image.sha.clone(), harborwatch_model::ScanStatus::NotScanned)
                    .and_then(|()| submitter.should_scan_image(image.sha.clone()))
                    .and_then(|should_scan| {
                        if should_scan {
                            submitter.set_scan_status(image.sha.clone(), harborwatch_model::ScanStatus::InQueue)
                        } else {
                            Ok(())
                        }
                    }),
            };
            if let Err(error) = result {
                debug!(logger, "hub-check dispatch failed"; "image" => %image.sha, "error" => %error);
            }
        },
    )
}

/// Runs the loop that drains the Hub Manager's merged `Update` stream and
/// feeds completed scans back into the Model.
fn run_update_consumer(
    submitter: harborwatch_model::ActionSubmitter,
    updates: crossbeam_channel::Receiver<harborwatch_coordinator::TaggedUpdate>,
    name_to_sha: Arc<Mutex<HashMap<String, Digest>>>,
    logger: Logger,
) -> harborwatch_model::Result<humthreads::Thread<()>> {
    humthreads::Builder::new("hw:updates")
        .full_name("harborwatch:update-consumer")
        .spawn(move |scope| {
            scope.activity("draining hub update stream");
            for tagged in updates.iter() {
                if scope.should_shutdown() {
                    break;
                }
                match tagged.update {
                    Update::ScanCompleted { code_location, results } => {
                        let sha = name_to_sha.lock().expect("name_to_sha poisoned").remove(code_location.as_str());
                        match sha {
                            // RunningHubScan -> Complete. The RunningScanClient ->
                            // RunningHubScan half already happened in `run_scan_dispatch`
                            // right after dispatch succeeded.
                            Some(sha) => {
                                if let Err(error) = submitter.did_fetch_scan_results(sha, results) {
                                    debug!(logger, "failed to merge completed scan"; "error" => %error);
                                }
                            }
                            None => debug!(
                                logger, "completed scan for untracked code location";
                                "code_location" => code_location.as_str()
                            ),
                        }
                    }
                    Update::CodeLocationDiscovered { code_location } => {
                        debug!(
                            logger, "hub knows about a code location with no local owner yet";
                            "code_location" => code_location.as_str(), "hub" => &tagged.hub_url
                        );
                    }
                }
            }
        })
        .with_context(|_| harborwatch_model::ErrorKind::SpawnThread("update consumer"))
        .map_err(harborwatch_model::Error::from)
}

/// Runs the loop that periodically pulls a `GetModel` snapshot through the
/// reducer, overlays the primary hub's live circuit-breaker fields (the
/// `Model` itself has no visibility into any hub connection), and logs a
/// summary. This is the `GetModel` record §6 describes exposed as a JSON
/// admin endpoint in the original; that HTTP surface is out of scope here
/// (§1), so this ticker is what keeps `ActionSubmitter::get_model` reachable
/// and the merged snapshot exercised end to end.
fn run_snapshot_ticker(
    submitter: harborwatch_model::ActionSubmitter,
    hub_manager: Arc<Mutex<HubManager>>,
    hub_url: String,
    period: ::std::time::Duration,
    logger: Logger,
) -> harborwatch_model::Result<humthreads::Thread<()>> {
    harborwatch_model::spawn_ticker("hw:snapshot", "harborwatch:model:snapshot-ticker", period, logger.clone(), move || {
        match submitter.get_model() {
            Ok(mut snapshot) => {
                snapshot.hub_circuit_breaker = hub_manager.lock().expect("hub_manager poisoned").circuit_breaker_info(&hub_url);
                debug!(
                    logger, "model snapshot";
                    "pods" => snapshot.pods.len(),
                    "images" => snapshot.images.len(),
                    "scan_queue" => snapshot.image_scan_queue.len(),
                    "hub_check_queue" => snapshot.image_hub_check_queue.len(),
                    "hub_circuit_breaker_state" => ?snapshot.hub_circuit_breaker.state,
                );
            }
            Err(error) => debug!(logger, "failed to collect model snapshot"; "error" => %error),
        }
    })
}

/// Runs the loop that periodically pushes every hub client's
/// circuit-breaker/queue-depth gauges into Prometheus.
fn run_hub_metrics_ticker(
    hub_manager: Arc<Mutex<HubManager>>,
    period: ::std::time::Duration,
    logger: Logger,
) -> harborwatch_model::Result<humthreads::Thread<()>> {
    harborwatch_model::spawn_ticker("hw:hub-metrics", "harborwatch:hub-metrics-ticker", period, logger, move || {
        hub_manager.lock().expect("hub_manager poisoned").observe_metrics();
    })
}

/// Runs the loop that periodically copies the primary hub's observed
/// version into the Model (populates the `GetModel` snapshot's
/// `HubVersion` field, §6).
fn run_hub_version_poll(
    submitter: harborwatch_model::ActionSubmitter,
    hub_manager: Arc<Mutex<HubManager>>,
    hub_url: String,
    period: ::std::time::Duration,
    logger: Logger,
) -> harborwatch_model::Result<humthreads::Thread<()>> {
    harborwatch_model::spawn_ticker(
        "hw:hub-version",
        "harborwatch:hub-version-poll",
        period,
        logger,
        move || {
            let version = hub_manager.lock().expect("hub_manager poisoned").hub_version(&hub_url);
            if let Some(version) = version {
                if !version.is_empty() {
                    let _ = submitter.set_hub_version(version);
                }
            }
        },
    )
}

/// Initialises every subsystem and blocks until the reducer thread exits.
fn initialise_and_run(config: Config, logger: Logger) -> Result<()> {
    let registry = Registry::new();
    harborwatch_model::register_metrics(&logger, &registry);
    harborwatch_hub::register_metrics(&logger, &registry);

    info!(logger, "Building model and reducer");
    let model_config = config.to_model_config();
    let model = Model::new(model_config, config.timings);
    let (submitter, reducer_thread) =
        Reducer::spawn(model, logger.clone()).context(ErrorKind::SpawnThread("model reducer"))?;

    let metrics_ticker = harborwatch_model::spawn_metrics_ticker(
        submitter.clone(),
        config.timings.model_metrics_pause.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("metrics ticker"))?;
    let stalled_scan_ticker = harborwatch_model::spawn_stalled_scan_ticker(
        submitter.clone(),
        config.timings.check_for_stalled_scans_pause.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("stalled-scan ticker"))?;
    let refresh_ticker = harborwatch_model::spawn_refresh_ticker(
        submitter.clone(),
        config.timings.enqueue_images_for_refresh_pause.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("refresh ticker"))?;

    info!(logger, "Starting hub manager");
    let hub_manager = Arc::new(Mutex::new(HubManager::new(
        config.timings,
        config.circuit_breaker.clone(),
        raw_client_factory(),
        logger.clone(),
    )));
    let hub_url = config.hub.host.clone();
    {
        let mut desired = HashMap::new();
        desired.insert(hub_url.clone(), config.hub.clone());
        hub_manager.lock().expect("hub_manager poisoned").set_hubs(desired);
    }

    let scan_client: Arc<dyn ScanClient> = Arc::new(MockScanClient::new());
    let name_to_sha: Arc<Mutex<HashMap<String, Digest>>> = Arc::new(Mutex::new(HashMap::new()));
    let updates = hub_manager.lock().expect("hub_manager poisoned").updates();

    let scan_dispatch = run_scan_dispatch(
        submitter.clone(),
        Arc::clone(&hub_manager),
        hub_url.clone(),
        scan_client,
        Arc::clone(&name_to_sha),
        config.timings.check_hub_throttle.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("scan dispatch"))?;
    let hub_check_dispatch = run_hub_check_dispatch(
        submitter.clone(),
        Arc::clone(&hub_manager),
        hub_url.clone(),
        config.timings.check_hub_throttle.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("hub-check dispatch"))?;
    let update_consumer = run_update_consumer(submitter.clone(), updates, name_to_sha, logger.clone())
        .context(ErrorKind::SpawnThread("update consumer"))?;
    let hub_version_poll = run_hub_version_poll(
        submitter.clone(),
        Arc::clone(&hub_manager),
        hub_url.clone(),
        config.timings.hub_relogin_pause.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("hub version poll"))?;
    let hub_metrics_ticker = run_hub_metrics_ticker(
        Arc::clone(&hub_manager),
        config.timings.model_metrics_pause.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("hub metrics ticker"))?;
    let snapshot_ticker = run_snapshot_ticker(
        submitter,
        Arc::clone(&hub_manager),
        hub_url,
        config.timings.model_metrics_pause.as_duration(),
        logger.clone(),
    )
    .context(ErrorKind::SpawnThread("snapshot ticker"))?;

    info!(logger, "Harborwatch ready");
    let result = reducer_thread.join();

    hub_manager.lock().expect("hub_manager poisoned").stop_all();
    let _ = metrics_ticker.join();
    let _ = stalled_scan_ticker.join();
    let _ = refresh_ticker.join();
    let _ = scan_dispatch.join();
    let _ = hub_check_dispatch.join();
    let _ = update_consumer.join();
    let _ = hub_version_poll.join();
    let _ = hub_metrics_ticker.join();
    let _ = snapshot_ticker.join();

    result.map_err(|error| {
        warn!(logger, "Model reducer exited with an error"; "error" => %error);
        ErrorKind::SpawnThread("model reducer").into()
    })
}

/// Parses the command line, loads configuration, configures logging, then
/// hands off to `initialise_and_run`.
pub fn run() -> Result<()> {
    let cli_args = App::new("Harborwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .default_value("harborwatch.yaml")
                .help("Specifies the configuration file to use")
                .takes_value(true),
        )
        .get_matches();

    let starter = logging::starter();
    let config_location = cli_args.value_of("config").unwrap();
    info!(starter, "Loading configuration"; "config" => config_location);
    let config = Config::from_file(config_location).context(ErrorKind::ConfigLoad)?;
    if config.hub.looks_like_url() {
        warn!(
            starter, "hub.host looks like a URL, expected a bare hostname";
            "host" => &config.hub.host
        );
    }

    let logger = logging::configure(&config.logging);
    debug!(logger, "Logging configured");

    let result = initialise_and_run(config, logger.clone());
    warn!(logger, "Shutdown: system exiting now"; "error" => result.is_err());
    result
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use harborwatch_model::CodeLocation;
    use harborwatch_model::Digest;
    use harborwatch_model::Image;
    use harborwatch_model::ModelConfig;
    use harborwatch_model::ModelTimings;
    use harborwatch_model::Reducer;
    use harborwatch_model::ScanResults;
    use harborwatch_model::ScanStatus;
    use slog::Logger;

    use super::*;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    /// Drives an image through the exact action sequence `run_scan_dispatch`
    /// and `run_update_consumer` issue for a normally-dispatched scan
    /// (enqueue -> dispatch -> publish, §1/§4.3), and checks it actually
    /// reaches `Complete`. A prior version of this wiring called
    /// `did_fetch_scan_results` before the dispatch side ever moved the
    /// image out of `RunningScanClient`, so it always failed with
    /// `IllegalTransition` and the image got stuck at `RunningScanClient`
    /// forever.
    #[test]
    fn normal_dispatch_reaches_complete() {
        let model = Model::new(ModelConfig::default(), ModelTimings::default());
        let (submitter, reducer_thread) = Reducer::spawn(model, logger()).unwrap();

        let sha = Digest::new("sha256:abc");
        let image = Image::new(sha.clone(), "repo/app:latest", Utc::now());
        submitter.add_image(image, 0).unwrap();

        // Hub-check side: adopted by nobody, falls through to the scan queue.
        submitter.set_scan_status(sha.clone(), ScanStatus::InHubCheckQueue).unwrap();
        let popped = submitter.get_next_image_from_hub_check_queue().unwrap().unwrap();
        assert_eq!(popped.sha, sha);
        submitter.set_scan_status(sha.clone(), ScanStatus::NotScanned).unwrap();
        submitter.set_scan_status(sha.clone(), ScanStatus::InQueue).unwrap();

        // `run_scan_dispatch`: pop, dispatch succeeds, RunningScanClient -> RunningHubScan.
        let popped = submitter.get_next_image_from_scan_queue().unwrap().unwrap();
        assert_eq!(popped.sha, sha);
        submitter.finish_running_scan_client(sha.clone(), false).unwrap();

        // `run_update_consumer`: ScanCompleted arrives, RunningHubScan -> Complete.
        let results = ScanResults {
            code_location: CodeLocation::for_image_name("harborwatch", "repo/app:latest"),
            vulnerabilities: 0,
            policy_status: "NOT_IN_VIOLATION".to_string(),
        };
        submitter.did_fetch_scan_results(sha.clone(), results).unwrap();

        let snapshot = submitter.get_model().unwrap();
        let tracked = snapshot.images.iter().find(|image| image.sha == sha).unwrap();
        assert_eq!(tracked.scan_status, ScanStatus::Complete);

        drop(submitter);
        let _ = reducer_thread.join();
    }

    /// A dispatch failure re-enqueues instead of getting stuck, mirroring
    /// `run_scan_dispatch`'s error branch.
    #[test]
    fn failed_dispatch_returns_to_queue() {
        let model = Model::new(ModelConfig::default(), ModelTimings::default());
        let (submitter, reducer_thread) = Reducer::spawn(model, logger()).unwrap();

        let sha = Digest::new("sha256:def");
        let image = Image::new(sha.clone(), "repo/other:latest", Utc::now());
        submitter.add_image(image, 0).unwrap();
        submitter.set_scan_status(sha.clone(), ScanStatus::InHubCheckQueue).unwrap();
        submitter.get_next_image_from_hub_check_queue().unwrap().unwrap();
        submitter.set_scan_status(sha.clone(), ScanStatus::NotScanned).unwrap();
        submitter.set_scan_status(sha.clone(), ScanStatus::InQueue).unwrap();
        submitter.get_next_image_from_scan_queue().unwrap().unwrap();

        submitter.finish_running_scan_client(sha.clone(), true).unwrap();

        let snapshot = submitter.get_model().unwrap();
        let tracked = snapshot.images.iter().find(|image| image.sha == sha).unwrap();
        assert_eq!(tracked.scan_status, ScanStatus::InQueue);
        assert!(snapshot.image_scan_queue.contains(&sha));

        drop(submitter);
        let _ = reducer_thread.join();
    }
}
