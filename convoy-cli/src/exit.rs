//! Process exit codes.

use convoy::core::{ConsolidatedReport, RunState};
use convoy::errors::ConvoyError;

/// Every stage succeeded (and verification passed, if it ran).
pub const SUCCESS: u8 = 0;
/// A fatal stage halted the run.
pub const FATAL: u8 = 1;
/// One or more recoverable stages failed.
pub const PARTIAL: u8 = 2;
/// Verification ran and did not pass.
pub const VERIFICATION_FAILED: u8 = 3;
/// Bad pipeline file, override or flag.
pub const USAGE: u8 = 64;
/// Anything else.
pub const INTERNAL: u8 = 70;

/// Exit code of a finished run.
pub fn for_run(state: RunState, verification: Option<&ConsolidatedReport>) -> u8 {
    match state {
        RunState::FailedFatal => FATAL,
        RunState::PartialSuccess => PARTIAL,
        RunState::Succeeded => match verification {
            Some(report) if !report.all_passed() => VERIFICATION_FAILED,
            _ => SUCCESS,
        },
        RunState::NotStarted | RunState::Running => INTERNAL,
    }
}

/// Exit code of a standalone verification.
pub fn for_report(report: &ConsolidatedReport) -> u8 {
    if report.all_passed() {
        SUCCESS
    } else {
        VERIFICATION_FAILED
    }
}

/// Exit code for an error that ended the command.
pub fn for_error(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ConvoyError>() {
        Some(ConvoyError::Config(_) | ConvoyError::Validation(_)) => USAGE,
        _ => INTERNAL,
    }
}
