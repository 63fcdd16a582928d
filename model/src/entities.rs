use chrono::DateTime;
use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::digest::Digest;
use crate::status::ScanStatus;

/// One container reference as reported by discovery: a human name plus the
/// content digest it resolves to. `AddPod` takes a list of these; the `Pod`
/// entity itself keeps only the digests (see the ownership note in
/// `crate::model`).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub sha: Digest,
}

impl ImageRef {
    pub fn new<S: Into<String>>(name: S, sha: Digest) -> ImageRef {
        ImageRef { name: name.into(), sha }
    }
}

/// A Kubernetes-style pod, keyed by namespace + name, listing the images its
/// containers run.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new<N: Into<String>, M: Into<String>>(namespace: N, name: M) -> PodKey {
        PodKey { namespace: namespace.into(), name: name.into() }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Pod {
    pub key: PodKey,
    pub images: Vec<Digest>,
}

impl Pod {
    pub fn new(key: PodKey, images: Vec<Digest>) -> Pod {
        Pod { key, images }
    }
}

/// A code location is the hub-side name a scan is registered under,
/// derived from the human image name (`scanner.ScanJob` in the original).
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct CodeLocation(String);

impl CodeLocation {
    pub fn for_image_name(project: &str, image_name: &str) -> CodeLocation {
        CodeLocation(format!("{}/{}", project, image_name))
    }

    /// Wraps an already-formed code-location name, e.g. one parsed back out
    /// of a hub API response.
    pub fn new(name: impl Into<String>) -> CodeLocation {
        CodeLocation(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Results of a completed scan, as merged back into the Model by
/// `DidFetchScanResults`. This is the Rust-side equivalent of the
/// original's `hub.ImageScan`.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ScanResults {
    pub code_location: CodeLocation,
    pub vulnerabilities: u32,
    pub policy_status: String,
}

/// A tracked image: its human names, optional per-layer breakdown, and its
/// position in the scan-status state machine.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Image {
    pub sha: Digest,
    pub names: Vec<String>,
    pub layers: Option<Vec<Digest>>,
    pub scan_status: ScanStatus,
    pub time_of_last_status_change: DateTime<Utc>,
    pub scan_results: Option<ScanResults>,
}

impl Image {
    pub fn new(sha: Digest, name: impl Into<String>, now: DateTime<Utc>) -> Image {
        Image {
            sha,
            names: vec![name.into()],
            layers: None,
            scan_status: ScanStatus::Unknown,
            time_of_last_status_change: now,
            scan_results: None,
        }
    }

    pub fn add_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.names.iter().any(|existing| existing == &name) {
            self.names.push(name);
        }
    }
}

/// A single filesystem layer within an image. Layers carry their own
/// position in the scan-status state machine (see the Open Question
/// resolution in `SPEC_FULL.md` §9) but are never placed on the image scan
/// queue: only whole images are dispatched to the scan client.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Layer {
    pub sha: Digest,
    pub owner_image: Digest,
    pub scan_status: ScanStatus,
    pub time_of_last_status_change: DateTime<Utc>,
    pub scan_results: Option<ScanResults>,
}

impl Layer {
    pub fn new(sha: Digest, owner_image: Digest, now: DateTime<Utc>) -> Layer {
        Layer {
            sha,
            owner_image,
            scan_status: ScanStatus::Unknown,
            time_of_last_status_change: now,
            scan_results: None,
        }
    }
}
