use std::time::Duration;

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

use crate::actions::Action;
use crate::digest::Digest;
use crate::entities::Image;
use crate::entities::ImageRef;
use crate::entities::PodKey;
use crate::entities::ScanResults;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::metrics;
use crate::model::Model;
use crate::model::ModelMetrics;
use crate::snapshot::ModelSnapshot;
use crate::status::ScanStatus;

/// Single-writer loop that owns the `Model` and applies `Action`s to it in
/// the order they arrive on `actions`. Nothing else is allowed to touch the
/// `Model`, so there is no locking anywhere in this crate (§4.1).
pub struct Reducer {
    model: Model,
    actions: Receiver<Action>,
}

impl Reducer {
    pub fn new(model: Model, actions: Receiver<Action>) -> Reducer {
        Reducer { model, actions }
    }

    /// Drains the action channel until it is closed (every `ActionSubmitter`
    /// dropped) or a `Shutdown` is requested externally by closing the
    /// channel from the caller side.
    pub fn run(mut self, logger: &Logger) {
        for action in self.actions.iter() {
            action.apply(&mut self.model);
        }
        debug!(logger, "action channel closed, reducer loop exiting");
    }

    /// Starts the reducer on its own named thread and returns a handle
    /// submitters can clone freely plus the `Thread` to join on shutdown.
    pub fn spawn(
        model: Model,
        logger: Logger,
    ) -> Result<(ActionSubmitter, Thread<()>), Error> {
        let (sender, receiver) = unbounded();
        let thread_logger = logger.clone();
        let reducer = Reducer::new(model, receiver);
        let thread = Builder::new("hw:reducer")
            .full_name("harborwatch:model:reducer")
            .spawn(move |scope| {
                scope.activity("applying actions to the model");
                reducer.run(&thread_logger);
            })
            .with_context(|_| ErrorKind::SpawnThread("model reducer"))?;
        Ok((ActionSubmitter::new(sender), thread))
    }
}

/// Cloneable handle used to submit `Action`s to a running `Reducer`.
///
/// Wraps the raw `Sender<Action>` with the ergonomic, blocking call shape
/// every other crate in this workspace actually wants: build a one-shot
/// reply channel, send the action, wait for the answer. A disconnected
/// reducer (it panicked or was dropped) surfaces as `ErrorKind::Shutdown`
/// rather than a channel-specific error.
#[derive(Clone)]
pub struct ActionSubmitter(Sender<Action>);

impl ActionSubmitter {
    pub fn new(sender: Sender<Action>) -> ActionSubmitter {
        ActionSubmitter(sender)
    }

    fn call<T, F>(&self, build: F) -> Result<T, Error>
    where
        F: FnOnce(Sender<Result<T, Error>>) -> Action,
    {
        let (reply, result) = bounded(1);
        let action = build(reply);
        self.0.send(action).map_err(|_| ErrorKind::Shutdown)?;
        match result.recv_timeout(Duration::from_secs(30)) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ErrorKind::Shutdown.into()),
            Err(RecvTimeoutError::Disconnected) => Err(ErrorKind::Shutdown.into()),
        }
    }

    /// Submits an action without waiting for a reply. Used by tickers and
    /// other fire-and-forget callers.
    fn cast(&self, action: Action) -> Result<(), Error> {
        self.0.send(action).map_err(|_| ErrorKind::Shutdown.into())
    }

    pub fn add_pod(&self, key: PodKey, containers: Vec<ImageRef>) -> Result<(), Error> {
        self.call(|reply| Action::AddPod { key, containers, reply: Some(reply) })
    }

    pub fn add_image(&self, image: Image, priority: i32) -> Result<(), Error> {
        self.call(|reply| Action::AddImage { image, priority, reply: Some(reply) })
    }

    pub fn set_scan_status(&self, sha: Digest, to: ScanStatus) -> Result<(), Error> {
        self.call(|reply| Action::SetScanStatus { sha, to, reply: Some(reply) })
    }

    pub fn get_next_image_from_scan_queue(&self) -> Result<Option<Image>, Error> {
        self.call(|reply| Action::GetNextImageFromScanQueue { reply })
    }

    pub fn get_next_image_from_hub_check_queue(&self) -> Result<Option<Image>, Error> {
        self.call(|reply| Action::GetNextImageFromHubCheckQueue { reply })
    }

    pub fn finish_running_scan_client(&self, sha: Digest, failed: bool) -> Result<(), Error> {
        self.call(|reply| Action::FinishRunningScanClient { sha, failed, reply: Some(reply) })
    }

    pub fn should_scan_layer(&self, sha: Digest) -> Result<bool, Error> {
        self.call(|reply| Action::ShouldScanLayer { sha, reply })
    }

    pub fn should_scan_image(&self, sha: Digest) -> Result<bool, Error> {
        self.call(|reply| Action::ShouldScanImage { sha, reply })
    }

    pub fn did_fetch_scan_results(&self, sha: Digest, results: ScanResults) -> Result<(), Error> {
        self.call(|reply| Action::DidFetchScanResults { sha, results, reply: Some(reply) })
    }

    /// Fire-and-forget trigger used by the stalled-scan ticker: nobody
    /// downstream needs the swept count, only the side effect.
    pub fn sweep_stalled_scans(&self) -> Result<(), Error> {
        self.cast(Action::SweepStalledScans { reply: None })
    }

    /// Fire-and-forget trigger used by the enqueue-refresh ticker.
    pub fn sweep_stale_completed_scans(&self) -> Result<(), Error> {
        self.cast(Action::SweepStaleCompletedScans { reply: None })
    }

    pub fn set_hub_version(&self, version: String) -> Result<(), Error> {
        self.cast(Action::SetHubVersion { version })
    }

    pub fn get_model(&self) -> Result<ModelSnapshot, Error> {
        self.call(|reply| Action::GetModel { reply })
    }

    pub fn get_metrics(&self) -> Result<ModelMetrics, Error> {
        self.call(|reply| Action::GetMetrics { reply })
    }
}

/// Spawns a named background thread that submits `action` on a fixed
/// period until the process asks it to shut down. Grounds the §4.2 ticker
/// set (stalled-scan sweep, metrics snapshot) in the same
/// `humthreads::Builder` idiom the reducer itself uses.
pub fn spawn_ticker<F>(
    short_name: &'static str,
    full_name: &'static str,
    period: Duration,
    logger: Logger,
    mut tick: F,
) -> Result<Thread<()>, Error>
where
    F: FnMut() + Send + 'static,
{
    Builder::new(short_name)
        .full_name(full_name)
        .spawn(move |scope| {
            scope.activity(format!("ticking every {:?}", period));
            while !scope.should_shutdown() {
                tick();
                let _activity = scope.scoped_activity(format!("sleeping {:?}", period));
                ::std::thread::sleep(period);
            }
            debug!(logger, "ticker thread shutting down"; "name" => full_name);
        })
        .with_context(|_| ErrorKind::SpawnThread(short_name))
        .map_err(Error::from)
}

/// Spawns the metrics-observation ticker: periodically pulls a
/// `ModelMetrics` snapshot through the reducer and pushes it into the
/// Prometheus gauges in `crate::metrics`.
pub fn spawn_metrics_ticker(
    submitter: ActionSubmitter,
    period: Duration,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    spawn_ticker("hw:metrics", "harborwatch:model:metrics-ticker", period, logger.clone(), move || {
        match submitter.get_metrics() {
            Ok(snapshot) => metrics::observe(&snapshot),
            Err(error) => debug!(logger, "failed to collect model metrics"; "error" => %error),
        }
    })
}

/// Spawns the stuck-scan sweep ticker (§4.3 "Stuck scan sweep", §8 scenario
/// 4): periodically forces scans stuck past `StalledScanClientTimeout` back
/// onto the scan queue.
pub fn spawn_stalled_scan_ticker(
    submitter: ActionSubmitter,
    period: Duration,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    spawn_ticker("hw:sweep", "harborwatch:model:stalled-scan-ticker", period, logger.clone(), move || {
        if let Err(error) = submitter.sweep_stalled_scans() {
            debug!(logger, "failed to submit stalled-scan sweep"; "error" => %error);
        }
    })
}

/// Spawns the enqueue-refresh ticker (§4.2 new): periodically re-enqueues
/// images whose completed results are older than `RefreshThresholdDuration`.
pub fn spawn_refresh_ticker(
    submitter: ActionSubmitter,
    period: Duration,
    logger: Logger,
) -> Result<Thread<()>, Error> {
    spawn_ticker("hw:refresh", "harborwatch:model:refresh-ticker", period, logger.clone(), move || {
        if let Err(error) = submitter.sweep_stale_completed_scans() {
            debug!(logger, "failed to submit enqueue-refresh sweep"; "error" => %error);
        }
    })
}
