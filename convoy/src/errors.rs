//! Error types for the convoy coordinator.
//!
//! Stage and verifier failures are *values* (see [`crate::pipeline::StageOutcome`]
//! and [`crate::core::ProbeResult`]); the errors here cover what can go wrong
//! around them: invalid pipeline definitions, broken configuration, commands
//! that cannot be spawned and artifacts that cannot be written.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for convoy operations.
#[derive(Debug, Error)]
pub enum ConvoyError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Configuration could not be loaded or an override is malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external command could not be executed.
    #[error("{0}")]
    Command(#[from] CommandError),

    /// A readiness probe never reported ready.
    #[error("Component '{component}' not ready after {attempts} attempt(s)")]
    ProbeTimeout {
        /// The probed component.
        component: String,
        /// Number of checks performed.
        attempts: u32,
    },

    /// The run was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A status artifact could not be persisted or loaded.
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type Result<T, E = ConvoyError> = std::result::Result<T, E>;

/// Error raised when an external command cannot be run at all.
///
/// A command that runs and exits non-zero is *not* an error; it is reported
/// through [`crate::runner::CommandOutput`].
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The command spec has no program.
    #[error("Command for '{0}' is empty")]
    Empty(String),

    /// The process could not be spawned.
    #[error("Failed to spawn '{program}': {message}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The OS error message.
        message: String,
    },

    /// Waiting for the process failed.
    #[error("Failed to wait for '{program}': {message}")]
    Wait {
        /// The program being awaited.
        program: String,
        /// The OS error message.
        message: String,
    },
}

/// Classification of failures carried on outcomes and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Aborts the run.
    FatalStageFailure,
    /// Retried up to policy, then tolerated.
    RecoverableStageFailure,
    /// A readiness gate never became ready.
    ProbeTimeout,
    /// A verifier artifact could not be parsed.
    AggregationParseError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalStageFailure => write!(f, "fatal_stage_failure"),
            Self::RecoverableStageFailure => write!(f, "recoverable_stage_failure"),
            Self::ProbeTimeout => write!(f, "probe_timeout"),
            Self::AggregationParseError => write!(f, "aggregation_parse_error"),
        }
    }
}

/// Metadata about a validation error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONVOY-002-FORWARD_REF").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when a pipeline or verifier set fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages (or components) involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_builder() {
        let err = PipelineValidationError::new("Stage 'b' depends on unknown stage 'c'")
            .with_stages(vec!["b".to_string(), "c".to_string()])
            .with_error_info(
                ContractErrorInfo::new("CONVOY-002-FORWARD_REF", "Dependency 'c' not declared")
                    .with_fix_hint("Declare 'c' before 'b'."),
            );

        assert_eq!(err.to_string(), "Stage 'b' depends on unknown stage 'c'");
        assert_eq!(err.stages.len(), 2);
        assert_eq!(err.code(), Some("CONVOY-002-FORWARD_REF"));
    }

    #[test]
    fn test_convoy_error_from_validation() {
        let err: ConvoyError = PipelineValidationError::new("bad").into();
        assert!(matches!(err, ConvoyError::Validation(_)));
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_probe_timeout_message() {
        let err = ConvoyError::ProbeTimeout {
            component: "clickhouse".to_string(),
            attempts: 30,
        };
        assert_eq!(
            err.to_string(),
            "Component 'clickhouse' not ready after 30 attempt(s)"
        );
    }

    #[test]
    fn test_failure_kind_serialize() {
        let json = serde_json::to_string(&FailureKind::ProbeTimeout).unwrap();
        assert_eq!(json, r#""probe_timeout""#);
        assert_eq!(FailureKind::FatalStageFailure.to_string(), "fatal_stage_failure");
    }
}
