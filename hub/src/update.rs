use harborwatch_model::CodeLocation;
use harborwatch_model::ScanResults;

/// One event a `HubClient`'s background loops publish. The Hub Manager
/// fans these in across every hub, tagging each with its originating URL
/// (§4.5).
#[derive(Clone, Debug)]
pub enum Update {
    /// Poll-completed-scans found a finished result for `code_location`.
    ScanCompleted { code_location: CodeLocation, results: ScanResults },

    /// Fetch-code-locations found a code location the hub knows about that
    /// this process had no in-flight or cached record of — an adoption
    /// (§8 scenario 2, §4.4 new).
    CodeLocationDiscovered { code_location: CodeLocation },
}
