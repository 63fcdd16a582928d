use chrono::Utc;
use crossbeam_channel::Sender;

use crate::digest::Digest;
use crate::entities::Image;
use crate::entities::ImageRef;
use crate::entities::PodKey;
use crate::entities::ScanResults;
use crate::error::Error;
use crate::model::Model;
use crate::model::ModelMetrics;
use crate::snapshot::ModelSnapshot;
use crate::status::ScanStatus;

/// Reply channel attached to an `Action`. Collapses the original's pair of
/// `Success`/`Err` channels into a single typed `Result` send: submitters
/// that don't care about the outcome (fire-and-forget tickers) pass `None`.
pub type Reply<T> = Sender<Result<T, Error>>;

/// Every way the `Reducer` is allowed to mutate or query the `Model`.
///
/// An `Action` is a self-contained command object: submitting one on the
/// action channel and letting the `Reducer` apply it in arrival order is
/// the only legal way to touch a `Model` (§4.1, §9 "Action discipline").
/// Every variant that returns a value carries its own reply channel rather
/// than the caller blocking on a shared return slot, so unrelated callers
/// never contend with each other waiting on the reducer.
pub enum Action {
    AddPod {
        key: PodKey,
        containers: Vec<ImageRef>,
        reply: Option<Reply<()>>,
    },
    AddImage {
        image: Image,
        priority: i32,
        reply: Option<Reply<()>>,
    },
    SetScanStatus {
        sha: Digest,
        to: ScanStatus,
        reply: Option<Reply<()>>,
    },
    GetNextImageFromScanQueue {
        reply: Reply<Option<Image>>,
    },
    GetNextImageFromHubCheckQueue {
        reply: Reply<Option<Image>>,
    },
    FinishRunningScanClient {
        sha: Digest,
        failed: bool,
        reply: Option<Reply<()>>,
    },
    ShouldScanLayer {
        sha: Digest,
        reply: Reply<bool>,
    },
    ShouldScanImage {
        sha: Digest,
        reply: Reply<bool>,
    },
    DidFetchScanResults {
        sha: Digest,
        results: ScanResults,
        reply: Option<Reply<()>>,
    },
    SweepStalledScans {
        reply: Option<Reply<usize>>,
    },
    SweepStaleCompletedScans {
        reply: Option<Reply<usize>>,
    },
    SetHubVersion {
        version: String,
    },
    GetModel {
        reply: Reply<ModelSnapshot>,
    },
    GetMetrics {
        reply: Reply<ModelMetrics>,
    },
}

impl Action {
    /// Applies this action to `model`, sending the result (if anyone is
    /// listening) on its reply channel. Runs entirely on the `Reducer`
    /// thread; `model` is never shared outside of it.
    pub fn apply(self, model: &mut Model) {
        match self {
            Action::AddPod { key, containers, reply } => {
                let result = model.add_pod(key, containers, Utc::now());
                send(reply, result);
            }
            Action::AddImage { image, priority, reply } => {
                let result = model.add_image(image, priority);
                send(reply, result);
            }
            Action::SetScanStatus { sha, to, reply } => {
                let result = model.set_scan_status(&sha, to, Utc::now());
                send(reply, result);
            }
            Action::GetNextImageFromScanQueue { reply } => {
                let result = model.get_next_image_from_scan_queue(Utc::now());
                let _ = reply.send(result);
            }
            Action::GetNextImageFromHubCheckQueue { reply } => {
                let result = model.get_next_image_from_hub_check_queue(Utc::now());
                let _ = reply.send(result);
            }
            Action::FinishRunningScanClient { sha, failed, reply } => {
                let result = model.finish_running_scan_client(&sha, failed, Utc::now());
                send(reply, result);
            }
            Action::ShouldScanLayer { sha, reply } => {
                let result = model.should_scan_layer(&sha);
                let _ = reply.send(result);
            }
            Action::ShouldScanImage { sha, reply } => {
                let result = model.should_scan_image(&sha);
                let _ = reply.send(result);
            }
            Action::DidFetchScanResults { sha, results, reply } => {
                let result = model.did_fetch_scan_results(&sha, results, Utc::now());
                send(reply, result);
            }
            Action::SweepStalledScans { reply } => {
                let result = model.sweep_stalled_scans(Utc::now());
                send(reply, result);
            }
            Action::SweepStaleCompletedScans { reply } => {
                let result = model.sweep_stale_completed_scans(Utc::now());
                send(reply, result);
            }
            Action::SetHubVersion { version } => {
                model.set_hub_version(version);
            }
            Action::GetModel { reply } => {
                let _ = reply.send(Ok(model.snapshot()));
            }
            Action::GetMetrics { reply } => {
                let _ = reply.send(Ok(model.metrics()));
            }
        }
    }
}

/// Sends a result on an optional reply channel, dropping it silently if
/// nobody is waiting or the receiver has already hung up.
fn send<T>(reply: Option<Reply<T>>, result: Result<T, Error>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}
