use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;

use crate::config::ModelConfig;
use crate::config::ModelTimings;
use crate::digest::Digest;
use crate::entities::Image;
use crate::entities::ImageRef;
use crate::entities::Layer;
use crate::entities::Pod;
use crate::entities::PodKey;
use crate::entities::ScanResults;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::snapshot::HubCircuitBreakerInfo;
use crate::snapshot::ModelSnapshot;
use crate::status::ScanStatus;

/// Which kind of entity a digest currently names. Digests are content
/// addresses so in practice image and layer digest spaces never collide,
/// but the model does not assume that: lookups always check both.
enum EntityKind {
    Image,
    Layer,
}

/// Applies `to` to `image` if legal, updating its change timestamp.
///
/// A free function rather than a `Model` method: it only ever needs a
/// `&mut Image` borrowed out of `self.images`, and a method taking both
/// `&mut self` and that borrow would conflict with it under the borrow
/// checker.
fn transition_image(image: &mut Image, to: ScanStatus, now: DateTime<Utc>) -> Result<(), Error> {
    if !image.scan_status.can_transition_to(to) {
        return Err(ErrorKind::IllegalTransition(image.sha.to_string(), image.scan_status, to).into());
    }
    image.scan_status = to;
    image.time_of_last_status_change = now;
    Ok(())
}

/// The layer equivalent of `transition_image`.
fn transition_layer(layer: &mut Layer, to: ScanStatus, now: DateTime<Utc>) -> Result<(), Error> {
    if !layer.scan_status.can_transition_to(to) {
        return Err(ErrorKind::IllegalTransition(layer.sha.to_string(), layer.scan_status, to).into());
    }
    layer.scan_status = to;
    layer.time_of_last_status_change = now;
    Ok(())
}

/// The single source of truth for pods, images, layers, and scan queues.
///
/// `Model` is a passive value: every field below is reachable only through
/// `pub(crate)` methods, which in turn are only ever called from
/// `Action::apply` (see `crate::actions`). There are no public mutating
/// methods on `Model` itself — submitting an `Action` to the `Reducer` is
/// the only legal way to change it (§4.1, §9 "Action discipline").
pub struct Model {
    pods: HashMap<PodKey, Pod>,
    images: HashMap<Digest, Image>,
    layers: HashMap<Digest, Layer>,
    image_scan_queue: VecDeque<Digest>,
    image_hub_check_queue: VecDeque<Digest>,
    hub_version: String,
    config: ModelConfig,
    timings: ModelTimings,
}

impl Model {
    pub fn new(config: ModelConfig, timings: ModelTimings) -> Model {
        Model {
            pods: HashMap::new(),
            images: HashMap::new(),
            layers: HashMap::new(),
            image_scan_queue: VecDeque::new(),
            image_hub_check_queue: VecDeque::new(),
            hub_version: String::new(),
            config,
            timings,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn timings(&self) -> &ModelTimings {
        &self.timings
    }

    // -- lookups used by the `actions` module --------------------------------

    fn entity_kind(&self, sha: &Digest) -> Option<EntityKind> {
        if self.images.contains_key(sha) {
            Some(EntityKind::Image)
        } else if self.layers.contains_key(sha) {
            Some(EntityKind::Layer)
        } else {
            None
        }
    }

    pub(crate) fn image(&self, sha: &Digest) -> Option<&Image> {
        self.images.get(sha)
    }

    pub(crate) fn layer(&self, sha: &Digest) -> Option<&Layer> {
        self.layers.get(sha)
    }

    // -- mutation: pods and images --------------------------------------------

    /// Inserts a pod and, for every referenced image the model does not yet
    /// know about, creates it with `ScanStatus::Unknown` and immediately
    /// transitions it to `InHubCheckQueue`.
    ///
    /// Idempotent: calling this twice with the same pod and image refs
    /// leaves the model in the same state as calling it once, since image
    /// creation only happens for digests that are genuinely new and the pod
    /// entry is simply overwritten.
    pub(crate) fn add_pod(
        &mut self,
        key: PodKey,
        containers: Vec<ImageRef>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut digests = Vec::with_capacity(containers.len());
        for container in containers {
            digests.push(container.sha.clone());
            if let Some(image) = self.images.get_mut(&container.sha) {
                image.add_name(container.name);
                continue;
            }
            let mut image = Image::new(container.sha.clone(), container.name, now);
            transition_image(&mut image, ScanStatus::InHubCheckQueue, now)?;
            self.image_hub_check_queue.push_back(image.sha.clone());
            self.images.insert(image.sha.clone(), image);
        }
        self.pods.insert(key.clone(), Pod::new(key, digests));
        Ok(())
    }

    /// Idempotent insert of a pre-built `Image`. `priority` only affects
    /// where the image lands if it is later enqueued for scanning; the
    /// source never gave it a stronger meaning and neither do we (see the
    /// re-enqueue priority Open Question in `SPEC_FULL.md` §9).
    pub(crate) fn add_image(&mut self, image: Image, _priority: i32) -> Result<(), Error> {
        self.images.entry(image.sha.clone()).or_insert(image);
        Ok(())
    }

    /// Sets the scan status of whichever entity `sha` names, maintaining
    /// the scan-queue / hub-check-queue membership invariants (§3): entering
    /// `InQueue` or `InHubCheckQueue` appends the digest to the matching
    /// queue. Callers that pop from a queue (`get_next_image_from_scan_queue`,
    /// `get_next_image_from_hub_check_queue`) transition directly instead,
    /// since the pop itself already removed the digest from the queue.
    pub(crate) fn set_scan_status(
        &mut self,
        sha: &Digest,
        to: ScanStatus,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        match self.entity_kind(sha) {
            Some(EntityKind::Image) => {
                let image = self.images.get_mut(sha).expect("checked by entity_kind");
                if !image.scan_status.can_transition_to(to) {
                    return Err(ErrorKind::IllegalTransition(sha.to_string(), image.scan_status, to)
                        .into());
                }
                image.scan_status = to;
                image.time_of_last_status_change = now;
            }
            Some(EntityKind::Layer) => {
                let layer = self.layers.get_mut(sha).expect("checked by entity_kind");
                if !layer.scan_status.can_transition_to(to) {
                    return Err(ErrorKind::IllegalTransition(sha.to_string(), layer.scan_status, to)
                        .into());
                }
                layer.scan_status = to;
                layer.time_of_last_status_change = now;
            }
            None => return Err(ErrorKind::DigestNotFound(sha.to_string()).into()),
        }
        match to {
            ScanStatus::InQueue => self.image_scan_queue.push_back(sha.clone()),
            ScanStatus::InHubCheckQueue => self.image_hub_check_queue.push_back(sha.clone()),
            _ => {}
        }
        Ok(())
    }

    /// Pops the head of the scan queue and transitions it `InQueue ->
    /// RunningScanClient`, unless the queue is empty or the global count of
    /// `RunningScanClient + RunningHubScan` images has already reached
    /// `ConcurrentScanLimit` (§4.1, §8 invariant 3) — the single chokepoint
    /// enforcing the concurrency limit.
    pub(crate) fn get_next_image_from_scan_queue(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<Image>, Error> {
        let running = self
            .images
            .values()
            .filter(|image| image.scan_status.is_running())
            .count();
        if running >= self.config.concurrent_scan_limit {
            return Ok(None);
        }
        let sha = match self.image_scan_queue.pop_front() {
            Some(sha) => sha,
            None => return Ok(None),
        };
        let image = self
            .images
            .get_mut(&sha)
            .ok_or_else(|| ErrorKind::ImageNotFound(sha.to_string()))?;
        transition_image(image, ScanStatus::RunningScanClient, now)?;
        Ok(Some(image.clone()))
    }

    /// Pops the head of the hub-check queue and transitions it
    /// `InHubCheckQueue -> CheckingHub`. Unlike the scan queue this is not
    /// subject to `ConcurrentScanLimit`: hub-check probes are cheap and the
    /// limit only bounds concurrent scan-client / hub-scan work (§4.3).
    pub(crate) fn get_next_image_from_hub_check_queue(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<Image>, Error> {
        let sha = match self.image_hub_check_queue.pop_front() {
            Some(sha) => sha,
            None => return Ok(None),
        };
        let image = self
            .images
            .get_mut(&sha)
            .ok_or_else(|| ErrorKind::ImageNotFound(sha.to_string()))?;
        transition_image(image, ScanStatus::CheckingHub, now)?;
        Ok(Some(image.clone()))
    }

    /// Completes a scan-client run. Success moves the image on to
    /// `RunningHubScan`; failure is retryable and re-enqueues the image at
    /// the tail of the scan queue (§4.3, §8 scenario 1).
    pub(crate) fn finish_running_scan_client(
        &mut self,
        sha: &Digest,
        failed: bool,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let to = if failed { ScanStatus::InQueue } else { ScanStatus::RunningHubScan };
        self.set_scan_status(sha, to, now)
    }

    /// Decision query: may this layer be scanned right now?
    ///
    /// `Unknown` is itself an error (we have no basis to decide);
    /// `NotScanned` means yes; every other status means no (already queued,
    /// running, or complete).
    pub(crate) fn should_scan_layer(&self, sha: &Digest) -> Result<bool, Error> {
        let layer = self
            .layers
            .get(sha)
            .ok_or_else(|| ErrorKind::LayerNotFound(sha.to_string()))?;
        match layer.scan_status {
            ScanStatus::Unknown => Err(ErrorKind::ScanStatusUnknown(sha.to_string()).into()),
            ScanStatus::NotScanned => Ok(true),
            _ => Ok(false),
        }
    }

    /// The image-level equivalent of `should_scan_layer`.
    pub(crate) fn should_scan_image(&self, sha: &Digest) -> Result<bool, Error> {
        let image = self
            .images
            .get(sha)
            .ok_or_else(|| ErrorKind::ImageNotFound(sha.to_string()))?;
        match image.scan_status {
            ScanStatus::Unknown => Err(ErrorKind::ScanStatusUnknown(sha.to_string()).into()),
            ScanStatus::NotScanned => Ok(true),
            _ => Ok(false),
        }
    }

    /// Merges a result for one digest (image or layer), transitioning it to
    /// `Complete` and populating `scan_results` — the only place
    /// `scan_results` becomes `Some` (§3 invariant: `ScanResults` is
    /// non-nil iff `ScanStatus = Complete`).
    pub(crate) fn did_fetch_scan_results(
        &mut self,
        sha: &Digest,
        results: ScanResults,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        match self.entity_kind(sha) {
            Some(EntityKind::Image) => {
                let image = self.images.get_mut(sha).expect("checked by entity_kind");
                transition_image(image, ScanStatus::Complete, now)?;
                image.scan_results = Some(results);
            }
            Some(EntityKind::Layer) => {
                let layer = self.layers.get_mut(sha).expect("checked by entity_kind");
                transition_layer(layer, ScanStatus::Complete, now)?;
                layer.scan_results = Some(results);
            }
            None => return Err(ErrorKind::DigestNotFound(sha.to_string()).into()),
        }
        Ok(())
    }

    /// Forces any image stuck in `RunningScanClient`/`RunningHubScan` for
    /// longer than `StalledScanClientTimeout` back to `InQueue` (§4.3 "Stuck
    /// scan sweep", §8 scenario 4).
    pub(crate) fn sweep_stalled_scans(&mut self, now: DateTime<Utc>) -> Result<usize, Error> {
        let timeout = self.timings.stalled_scan_client_timeout.as_duration();
        let stuck: Vec<Digest> = self
            .images
            .values()
            .filter(|image| {
                image.scan_status.is_running()
                    && now
                        .signed_duration_since(image.time_of_last_status_change)
                        .to_std()
                        .map(|elapsed| elapsed > timeout)
                        .unwrap_or(false)
            })
            .map(|image| image.sha.clone())
            .collect();
        for sha in &stuck {
            self.set_scan_status(sha, ScanStatus::InQueue, now)?;
        }
        Ok(stuck.len())
    }

    /// Re-enqueues any image that has sat `Complete` for longer than
    /// `RefreshThresholdDuration`, so its results eventually get refreshed
    /// against the hub (§4.2 enqueue-refresh ticker).
    pub(crate) fn sweep_stale_completed_scans(&mut self, now: DateTime<Utc>) -> Result<usize, Error> {
        let threshold = self.timings.refresh_threshold_duration.as_duration();
        let stale: Vec<Digest> = self
            .images
            .values()
            .filter(|image| {
                image.scan_status == ScanStatus::Complete
                    && now
                        .signed_duration_since(image.time_of_last_status_change)
                        .to_std()
                        .map(|elapsed| elapsed > threshold)
                        .unwrap_or(false)
            })
            .map(|image| image.sha.clone())
            .collect();
        for sha in &stale {
            self.set_scan_status(sha, ScanStatus::InQueue, now)?;
        }
        Ok(stale.len())
    }

    // -- snapshotting ----------------------------------------------------------

    pub(crate) fn set_hub_version(&mut self, version: String) {
        self.hub_version = version;
    }

    pub(crate) fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            pods: self.pods.values().cloned().collect(),
            images: self.images.values().cloned().collect(),
            image_scan_queue: self.image_scan_queue.iter().cloned().collect(),
            image_hub_check_queue: self.image_hub_check_queue.iter().cloned().collect(),
            hub_version: self.hub_version.clone(),
            hub_circuit_breaker: HubCircuitBreakerInfo::default(),
            config: self.config.clone(),
            timings: self.timings,
        }
    }

    pub(crate) fn metrics(&self) -> ModelMetrics {
        let mut by_status = HashMap::new();
        for image in self.images.values() {
            *by_status.entry(image.scan_status).or_insert(0usize) += 1;
        }
        ModelMetrics {
            images_by_status: by_status,
            scan_queue_len: self.image_scan_queue.len(),
            hub_check_queue_len: self.image_hub_check_queue.len(),
            pod_count: self.pods.len(),
            image_count: self.images.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn contains_layer(&mut self, layer: Layer) {
        self.layers.insert(layer.sha.clone(), layer);
    }
}

/// Snapshot of per-status counts and queue lengths, returned by
/// `GetMetrics` (§4.1).
#[derive(Clone, Debug)]
pub struct ModelMetrics {
    pub images_by_status: HashMap<ScanStatus, usize>,
    pub scan_queue_len: usize,
    pub hub_check_queue_len: usize,
    pub pod_count: usize,
    pub image_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::config::ModelTimings;

    fn fresh() -> Model {
        Model::new(ModelConfig::default(), ModelTimings::default())
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    /// §8 scenario 1: scan-client failure retries.
    #[test]
    fn scan_client_failure_retries() {
        let mut model = fresh();
        let sha = Digest::new("23bcf2dae3");
        let image = Image::new(sha.clone(), "abc:4.0", now());
        model.add_image(image.clone(), 0).unwrap();
        model.set_scan_status(&sha, ScanStatus::InHubCheckQueue, now()).unwrap();
        model.set_scan_status(&sha, ScanStatus::CheckingHub, now()).unwrap();
        model.set_scan_status(&sha, ScanStatus::NotScanned, now()).unwrap();
        model.set_scan_status(&sha, ScanStatus::InQueue, now()).unwrap();
        let popped = model.get_next_image_from_scan_queue(now()).unwrap().unwrap();
        assert_eq!(popped.sha, sha);
        model.finish_running_scan_client(&sha, true, now()).unwrap();
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::InQueue);
        let next = model.get_next_image_from_scan_queue(now()).unwrap().unwrap();
        assert_eq!(next.sha, sha);
    }

    /// §8 scenario 2: hub-check adoption — the image never enters the scan
    /// queue when the hub already has results.
    #[test]
    fn hub_check_adoption_skips_scan_queue() {
        let mut model = fresh();
        let sha = Digest::new("adoptme");
        model
            .add_pod(
                PodKey::new("default", "pod-a"),
                vec![ImageRef::new("adopted:1.0", sha.clone())],
                now(),
            )
            .unwrap();
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::InHubCheckQueue);

        let popped = model.get_next_image_from_hub_check_queue(now()).unwrap().unwrap();
        assert_eq!(popped.sha, sha);
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::CheckingHub);

        model
            .did_fetch_scan_results(
                &sha,
                ScanResults {
                    code_location: crate::entities::CodeLocation::for_image_name("p", "adopted"),
                    vulnerabilities: 0,
                    policy_status: "IN_VIOLATION".into(),
                },
                now(),
            )
            .unwrap();
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::Complete);
        assert!(model.image_scan_queue.is_empty());
    }

    /// §8 scenario 3: concurrency limit.
    #[test]
    fn concurrency_limit_blocks_extra_scans() {
        let mut config = ModelConfig::default();
        config.concurrent_scan_limit = 2;
        let mut model = Model::new(config, ModelTimings::default());
        let shas: Vec<Digest> = (0..3).map(|i| Digest::new(format!("sha-{}", i))).collect();
        for sha in &shas {
            model.add_image(Image::new(sha.clone(), "img", now()), 0).unwrap();
            model.set_scan_status(sha, ScanStatus::InHubCheckQueue, now()).unwrap();
            model.set_scan_status(sha, ScanStatus::CheckingHub, now()).unwrap();
            model.set_scan_status(sha, ScanStatus::NotScanned, now()).unwrap();
            model.set_scan_status(sha, ScanStatus::InQueue, now()).unwrap();
        }
        let first = model.get_next_image_from_scan_queue(now()).unwrap();
        let second = model.get_next_image_from_scan_queue(now()).unwrap();
        let third = model.get_next_image_from_scan_queue(now()).unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(third.is_none());

        model.finish_running_scan_client(&shas[0], false, now()).unwrap();
        let fourth = model.get_next_image_from_scan_queue(now()).unwrap();
        assert!(fourth.is_some());
        assert_eq!(fourth.unwrap().sha, shas[2]);
    }

    /// §8 scenario 4: stuck-scan sweep.
    #[test]
    fn stalled_scan_is_swept_back_to_queue() {
        let mut model = fresh();
        let sha = Digest::new("stuck");
        let started = now();
        model.add_image(Image::new(sha.clone(), "img", started), 0).unwrap();
        model.set_scan_status(&sha, ScanStatus::InHubCheckQueue, started).unwrap();
        model.set_scan_status(&sha, ScanStatus::CheckingHub, started).unwrap();
        model.set_scan_status(&sha, ScanStatus::NotScanned, started).unwrap();
        model.set_scan_status(&sha, ScanStatus::InQueue, started).unwrap();
        model.get_next_image_from_scan_queue(started).unwrap();
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::RunningScanClient);

        let later = started + chrono::Duration::seconds(
            model.timings().stalled_scan_client_timeout.as_duration().as_secs() as i64 + 1,
        );
        let swept = model.sweep_stalled_scans(later).unwrap();
        assert_eq!(swept, 1);
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::InQueue);
    }

    #[test]
    fn stale_completed_scan_is_swept_back_to_queue() {
        let mut model = fresh();
        let sha = Digest::new("stale");
        let started = now();
        model.add_image(Image::new(sha.clone(), "img", started), 0).unwrap();
        model.set_scan_status(&sha, ScanStatus::InHubCheckQueue, started).unwrap();
        model.set_scan_status(&sha, ScanStatus::CheckingHub, started).unwrap();
        model
            .did_fetch_scan_results(
                &sha,
                ScanResults {
                    code_location: crate::entities::CodeLocation::for_image_name("p", "img"),
                    vulnerabilities: 0,
                    policy_status: "NOT_IN_VIOLATION".into(),
                },
                started,
            )
            .unwrap();
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::Complete);

        let later = started + chrono::Duration::seconds(
            model.timings().refresh_threshold_duration.as_duration().as_secs() as i64 + 1,
        );
        let swept = model.sweep_stale_completed_scans(later).unwrap();
        assert_eq!(swept, 1);
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::InQueue);
    }

    #[test]
    fn fresh_completed_scan_is_not_swept() {
        let mut model = fresh();
        let sha = Digest::new("fresh");
        let started = now();
        model.add_image(Image::new(sha.clone(), "img", started), 0).unwrap();
        model.set_scan_status(&sha, ScanStatus::InHubCheckQueue, started).unwrap();
        model.set_scan_status(&sha, ScanStatus::CheckingHub, started).unwrap();
        model
            .did_fetch_scan_results(
                &sha,
                ScanResults {
                    code_location: crate::entities::CodeLocation::for_image_name("p", "img"),
                    vulnerabilities: 0,
                    policy_status: "NOT_IN_VIOLATION".into(),
                },
                started,
            )
            .unwrap();
        let swept = model.sweep_stale_completed_scans(started).unwrap();
        assert_eq!(swept, 0);
        assert_eq!(model.image(&sha).unwrap().scan_status, ScanStatus::Complete);
    }

    #[test]
    fn add_pod_is_idempotent() {
        let mut model = fresh();
        let sha = Digest::new("dupe");
        let key = PodKey::new("ns", "pod");
        let refs = vec![ImageRef::new("dupe:1.0", sha.clone())];
        model.add_pod(key.clone(), refs.clone(), now()).unwrap();
        let after_first = model.snapshot();
        model.add_pod(key, refs, now()).unwrap();
        let after_second = model.snapshot();
        assert_eq!(after_first.images.len(), after_second.images.len());
        assert_eq!(after_first.pods.len(), after_second.pods.len());
    }

    #[test]
    fn add_image_is_idempotent() {
        let mut model = fresh();
        let sha = Digest::new("dupe-image");
        model.add_image(Image::new(sha.clone(), "a", now()), 0).unwrap();
        model.add_image(Image::new(sha.clone(), "a", now()), 0).unwrap();
        assert_eq!(model.images.len(), 1);
    }

    #[test]
    fn illegal_transition_is_rejected_and_model_unchanged() {
        let mut model = fresh();
        let sha = Digest::new("illegal");
        model.add_image(Image::new(sha.clone(), "a", now()), 0).unwrap();
        let before = model.image(&sha).unwrap().clone();
        let err = model.set_scan_status(&sha, ScanStatus::Complete, now()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::IllegalTransition(_, _, _)));
        assert_eq!(model.image(&sha).unwrap(), &before);
    }

    #[test]
    fn should_scan_layer_reports_unknown_as_error() {
        let mut model = fresh();
        let sha = Digest::new("layer-sha");
        model.contains_layer(Layer::new(sha.clone(), Digest::new("owner"), now()));
        let err = model.should_scan_layer(&sha).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ScanStatusUnknown(_)));
    }

    #[test]
    fn should_scan_layer_not_found() {
        let model = fresh();
        let err = model.should_scan_layer(&Digest::new("missing")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::LayerNotFound(_)));
    }
}
