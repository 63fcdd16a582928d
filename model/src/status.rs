use serde_derive::Deserialize;
use serde_derive::Serialize;

/// The scan lifecycle shared by images and layers.
///
/// The legal transitions are exactly the edges below; anything else is an
/// `IllegalTransition` error and must leave the model unchanged.
///
/// ```text
/// Unknown          -> InHubCheckQueue    : pod seen; image known, status undetermined
/// InHubCheckQueue  -> CheckingHub        : hub-check worker dequeued
/// CheckingHub      -> Complete           : hub already has results (adopted)
/// CheckingHub      -> NotScanned         : hub has no record
/// NotScanned       -> InQueue            : enqueued for scanning
/// InQueue          -> RunningScanClient  : scan-client worker dequeued
/// RunningScanClient-> RunningHubScan     : client uploaded successfully
/// RunningScanClient-> InQueue            : client failed (retryable)
/// RunningHubScan   -> Complete           : result-fetcher received results
/// Complete         -> InQueue            : stuck-scan sweep or explicit refresh
/// ```
///
/// `Unknown` and `Complete` are the only states that may transition to
/// themselves, and only via the idempotent no-op actions that create them
/// (`AddPod`/`AddImage` for `Unknown`, `DidFetchScanResults` for `Complete`).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum ScanStatus {
    Unknown,
    NotScanned,
    InHubCheckQueue,
    CheckingHub,
    InQueue,
    RunningScanClient,
    RunningHubScan,
    Complete,
}

impl ScanStatus {
    /// Whether `self -> to` is a legal transition per the state machine above.
    pub fn can_transition_to(self, to: ScanStatus) -> bool {
        use ScanStatus::*;
        match (self, to) {
            (Unknown, Unknown) => true,
            (Unknown, InHubCheckQueue) => true,
            (InHubCheckQueue, CheckingHub) => true,
            (CheckingHub, Complete) => true,
            (CheckingHub, NotScanned) => true,
            (NotScanned, InQueue) => true,
            (InQueue, RunningScanClient) => true,
            (RunningScanClient, RunningHubScan) => true,
            (RunningScanClient, InQueue) => true,
            (RunningHubScan, Complete) => true,
            (Complete, Complete) => true,
            (Complete, InQueue) => true,
            _ => false,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ScanStatus::RunningScanClient | ScanStatus::RunningHubScan)
    }
}

impl Default for ScanStatus {
    fn default() -> ScanStatus {
        ScanStatus::Unknown
    }
}

/// State of a per-hub circuit breaker.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    Enabled,
    Disabled,
    CheckingHealth,
}

impl Default for CircuitBreakerState {
    fn default() -> CircuitBreakerState {
        CircuitBreakerState::Enabled
    }
}

#[cfg(test)]
mod tests {
    use super::ScanStatus::*;

    #[test]
    fn legal_transitions_accepted() {
        assert!(Unknown.can_transition_to(InHubCheckQueue));
        assert!(InHubCheckQueue.can_transition_to(CheckingHub));
        assert!(CheckingHub.can_transition_to(Complete));
        assert!(CheckingHub.can_transition_to(NotScanned));
        assert!(NotScanned.can_transition_to(InQueue));
        assert!(InQueue.can_transition_to(RunningScanClient));
        assert!(RunningScanClient.can_transition_to(RunningHubScan));
        assert!(RunningScanClient.can_transition_to(InQueue));
        assert!(RunningHubScan.can_transition_to(Complete));
        assert!(Complete.can_transition_to(InQueue));
        assert!(Unknown.can_transition_to(Unknown));
        assert!(Complete.can_transition_to(Complete));
    }

    #[test]
    fn illegal_transitions_rejected() {
        assert!(!NotScanned.can_transition_to(Complete));
        assert!(!InQueue.can_transition_to(InHubCheckQueue));
        assert!(!RunningHubScan.can_transition_to(RunningScanClient));
        assert!(!InHubCheckQueue.can_transition_to(InHubCheckQueue));
        assert!(!NotScanned.can_transition_to(NotScanned));
    }
}
