//! Status enums shared across the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Health status reported by a probe or verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// Component is healthy.
    #[serde(alias = "success", alias = "passed", alias = "pass")]
    Ok,
    /// Component works but something deserves attention.
    #[serde(alias = "warn")]
    Warning,
    /// Component is broken.
    #[serde(alias = "failed", alias = "fail", alias = "failure")]
    Error,
    /// Component was not checked.
    #[serde(alias = "skip")]
    Skipped,
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl ProbeStatus {
    /// Returns true for `ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true for `error`.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Overall state of a pipeline run.
///
/// `NotStarted → Running → {Succeeded | FailedFatal | PartialSuccess}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No stage has been dispatched yet.
    #[default]
    NotStarted,
    /// At least one stage has been dispatched.
    Running,
    /// Every stage finished without a failure.
    Succeeded,
    /// A fatal stage exhausted its attempts; the run halted.
    FailedFatal,
    /// One or more recoverable stages failed, none fatally.
    PartialSuccess,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::FailedFatal => write!(f, "failed_fatal"),
            Self::PartialSuccess => write!(f, "partial_success"),
        }
    }
}

impl RunState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedFatal | Self::PartialSuccess)
    }
}

/// How a stage failure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Never retried; halts the run.
    #[default]
    Fatal,
    /// Retried per policy; the run continues degraded when exhausted.
    Recoverable,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Recoverable => write!(f, "recoverable"),
        }
    }
}

impl FromStr for FailureClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "recoverable" => Ok(Self::Recoverable),
            other => Err(format!("unknown failure class '{other}'")),
        }
    }
}

/// Terminal outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The action reported success.
    Succeeded,
    /// A recoverable stage exhausted its attempts.
    FailedRecoverable,
    /// A fatal stage failed.
    FailedFatal,
    /// The stage never ran.
    Skipped,
    /// The caller cancelled the run while this stage was in flight.
    Cancelled,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::FailedRecoverable => write!(f, "failed_recoverable"),
            Self::FailedFatal => write!(f, "failed_fatal"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl OutcomeKind {
    /// Returns true if the outcome halts the sequencer.
    #[must_use]
    pub fn halts_run(&self) -> bool {
        matches!(self, Self::FailedFatal | Self::Cancelled)
    }

    /// Returns true if the stage ran and failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FailedRecoverable | Self::FailedFatal)
    }
}
