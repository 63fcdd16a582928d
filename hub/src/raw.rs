use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use harborwatch_model::CodeLocation;
use harborwatch_model::ScanResults;

use crate::error::Error;
use crate::error::ErrorKind;

/// The HTTP-free boundary a `HubClient` talks through. The real
/// implementation (out of scope here, per §1) would issue the actual REST
/// calls to the hub; everything above this trait only ever depends on it
/// through `Arc<dyn RawHubClient>`.
pub trait RawHubClient: Send + Sync {
    /// Re-authenticates with the hub. Called by the login keep-alive loop.
    fn login(&self) -> Result<(), Error>;

    /// Current hub server version, used to populate `HubVersion` on the
    /// model snapshot.
    fn hub_version(&self) -> Result<String, Error>;

    /// Fetches the scan result for one code location, if the hub has
    /// completed it. `Ok(None)` means the hub has no completed result yet,
    /// not an error.
    fn fetch_scan_status(&self, code_location: &CodeLocation) -> Result<Option<ScanResults>, Error>;

    /// All code locations the hub currently has a record for, used by the
    /// fetch-code-locations loop to discover adopted scans (§4.4 new).
    fn fetch_code_locations(&self) -> Result<Vec<CodeLocation>, Error>;
}

/// In-memory `RawHubClient` for tests, grounded on the original's
/// `hub.NewMockRawClient`: a hub operator seeds known code locations and
/// their results directly, with no network involved.
pub struct MockRawHubClient {
    version: String,
    known: Mutex<HashMap<String, ScanResults>>,
    fail_login: Mutex<bool>,
}

impl MockRawHubClient {
    pub fn new(version: impl Into<String>) -> MockRawHubClient {
        MockRawHubClient {
            version: version.into(),
            known: Mutex::new(HashMap::new()),
            fail_login: Mutex::new(false),
        }
    }

    /// Seeds a completed scan the next `fetch_scan_status`/
    /// `fetch_code_locations` call will observe, as if the hub had finished
    /// it out of band.
    pub fn seed_result(&self, code_location: CodeLocation, results: ScanResults) {
        let mut known = self.known.lock().expect("MockRawHubClient::known poisoned");
        known.insert(code_location.as_str().to_string(), results);
    }

    /// Makes the next `login` call fail, to exercise the circuit breaker.
    pub fn fail_next_login(&self) {
        *self.fail_login.lock().expect("MockRawHubClient::fail_login poisoned") = true;
    }
}

impl RawHubClient for MockRawHubClient {
    fn login(&self) -> Result<(), Error> {
        let mut fail = self.fail_login.lock().expect("MockRawHubClient::fail_login poisoned");
        if *fail {
            *fail = false;
            return Err(ErrorKind::Backend("mock".to_string(), "forced login failure".to_string()).into());
        }
        Ok(())
    }

    fn hub_version(&self) -> Result<String, Error> {
        Ok(self.version.clone())
    }

    fn fetch_scan_status(&self, code_location: &CodeLocation) -> Result<Option<ScanResults>, Error> {
        let known = self.known.lock().expect("MockRawHubClient::known poisoned");
        Ok(known.get(code_location.as_str()).cloned())
    }

    fn fetch_code_locations(&self) -> Result<Vec<CodeLocation>, Error> {
        let known = self.known.lock().expect("MockRawHubClient::known poisoned");
        Ok(known.keys().map(|name| CodeLocation::new(name.as_str())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_result_is_returned() {
        let mock = MockRawHubClient::new("1.0.0");
        let code_location = CodeLocation::for_image_name("proj", "img");
        let results = ScanResults {
            code_location: code_location.clone(),
            vulnerabilities: 3,
            policy_status: "IN_VIOLATION".to_string(),
        };
        mock.seed_result(code_location.clone(), results.clone());
        assert_eq!(mock.fetch_scan_status(&code_location).unwrap(), Some(results));
    }

    #[test]
    fn unknown_code_location_returns_none() {
        let mock = MockRawHubClient::new("1.0.0");
        let missing = CodeLocation::for_image_name("proj", "missing");
        assert_eq!(mock.fetch_scan_status(&missing).unwrap(), None);
    }

    #[test]
    fn forced_login_failure_is_one_shot() {
        let mock = MockRawHubClient::new("1.0.0");
        mock.fail_next_login();
        assert!(mock.login().is_err());
        assert!(mock.login().is_ok());
    }
}
