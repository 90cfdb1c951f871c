//! Core data types: statuses, probe results and the consolidated report.

mod probe_result;
mod report;
mod status;


pub use probe_result::ProbeResult;
pub use report::{ConsolidatedReport, ReportSummary};
pub use status::{FailureClass, OutcomeKind, ProbeStatus, RunState};
