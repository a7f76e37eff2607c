//! Run and check outcome types.

use syncbox_types::RunMode;

/// Result of a completed sync run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// `sync`, `source_only`, or `destination_only`.
    pub mode: &'static str,
    pub records_forwarded: u64,
    pub states_captured: u64,
    pub lines_dropped: u64,
    /// Whether the state file was rewritten.
    pub state_persisted: bool,
    /// Non-fatal problems (e.g. a failed state write).
    pub warnings: Vec<String>,
    pub duration_secs: f64,
}

impl RunSummary {
    pub(crate) fn for_mode(mode: &RunMode) -> Self {
        Self {
            mode: mode.as_str(),
            ..Self::default()
        }
    }
}

/// Result of a successful connection check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub image: String,
    /// Message the connector attached to its `SUCCEEDED` status, if any.
    pub message: Option<String>,
    pub duration_secs: f64,
}
