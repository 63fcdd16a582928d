use std::sync::Mutex;

use harborwatch_model::Digest;

use crate::error::Error;

/// One unit of work handed to the external scan-client executable:
/// which image, under which hub project it should register its results.
/// Mirrors the original's `scanner.ScanJob`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ScanJob {
    pub project_name: String,
    pub image_name: String,
    pub sha: Digest,
}

impl ScanJob {
    pub fn new(project_name: impl Into<String>, image_name: impl Into<String>, sha: Digest) -> ScanJob {
        ScanJob { project_name: project_name.into(), image_name: image_name.into(), sha }
    }
}

/// The out-of-scope scan-client executable (§1, §6): whatever pulls an
/// image off the scan queue hands it to `scan`, then reports completion
/// back through `finish_running_scan_client` on the reducer. This trait
/// only models the hand-off, not the scan itself.
pub trait ScanClient: Send + Sync {
    /// Starts a scan for `job`. Must not block past accepting the job; the
    /// scan itself runs out of process.
    fn scan(&self, job: ScanJob) -> Result<(), Error>;
}

/// In-memory `ScanClient` for tests, grounded on the original's scan-client
/// interface: records every job it was handed so tests can assert on
/// dispatch without a real scanner process.
pub struct MockScanClient {
    jobs: Mutex<Vec<ScanJob>>,
}

impl MockScanClient {
    pub fn new() -> MockScanClient {
        MockScanClient { jobs: Mutex::new(Vec::new()) }
    }

    pub fn jobs(&self) -> Vec<ScanJob> {
        self.jobs.lock().expect("MockScanClient::jobs poisoned").clone()
    }
}

impl Default for MockScanClient {
    fn default() -> MockScanClient {
        MockScanClient::new()
    }
}

impl ScanClient for MockScanClient {
    fn scan(&self, job: ScanJob) -> Result<(), Error> {
        self.jobs.lock().expect("MockScanClient::jobs poisoned").push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_every_job_handed_to_it() {
        let client = MockScanClient::new();
        client.scan(ScanJob::new("proj", "img:1.0", Digest::new("sha1"))).unwrap();
        client.scan(ScanJob::new("proj", "img:2.0", Digest::new("sha2"))).unwrap();
        assert_eq!(client.jobs().len(), 2);
        assert_eq!(client.jobs()[0].image_name, "img:1.0");
    }
}
