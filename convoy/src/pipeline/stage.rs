//! Stage definitions.

use super::RetryPolicy;
use crate::core::FailureClass;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::probe::Probe;
use crate::runner::CommandSpec;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// A readiness condition checked before a stage's action runs.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    /// The probe to poll.
    pub probe: Arc<dyn Probe>,
    /// Delay between checks.
    pub interval: Duration,
    /// Maximum number of checks.
    pub max_attempts: u32,
}

impl ReadinessGate {
    /// Creates a gate.
    #[must_use]
    pub fn new(probe: Arc<dyn Probe>, interval: Duration, max_attempts: u32) -> Self {
        Self {
            probe,
            interval,
            max_attempts,
        }
    }
}

/// A named unit of orchestrated work.
///
/// Constructed at pipeline-definition time and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage name.
    pub name: String,
    /// The command to run.
    pub action: CommandSpec,
    /// How a failure of this stage is treated.
    pub on_failure: FailureClass,
    /// Retry policy (only consulted for recoverable stages).
    pub retry_policy: RetryPolicy,
    /// Stages that must succeed before this one runs.
    pub depends_on: BTreeSet<String>,
    /// Disabled stages are recorded as skipped.
    pub enabled: bool,
    /// Readiness gates waited on before the action runs.
    pub gates: Vec<ReadinessGate>,
}

impl Stage {
    /// Creates an enabled, fatal stage with the default retry policy.
    #[must_use]
    pub fn new(name: impl Into<String>, action: CommandSpec) -> Self {
        Self {
            name: name.into(),
            action,
            on_failure: FailureClass::Fatal,
            retry_policy: RetryPolicy::default(),
            depends_on: BTreeSet::new(),
            enabled: true,
            gates: Vec::new(),
        }
    }

    /// Marks the stage fatal.
    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.on_failure = FailureClass::Fatal;
        self
    }

    /// Marks the stage recoverable.
    #[must_use]
    pub fn recoverable(mut self) -> Self {
        self.on_failure = FailureClass::Recoverable;
        self
    }

    /// Sets the failure class.
    #[must_use]
    pub fn with_failure_class(mut self, class: FailureClass) -> Self {
        self.on_failure = class;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.insert(dep.into());
        self
    }

    /// Replaces the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables the stage.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a readiness gate.
    #[must_use]
    pub fn wait_for(mut self, gate: ReadinessGate) -> Self {
        self.gates.push(gate);
        self
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name, a self dependency, an invalid
    /// retry policy or a gate with a zero interval or zero attempts.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if self.depends_on.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(ContractErrorInfo::new(
                "CONVOY-003-SELF_DEP",
                format!("'{}' lists itself in depends_on", self.name),
            )));
        }
        self.retry_policy.validate(&self.name)?;
        for gate in &self.gates {
            if gate.interval.is_zero() || gate.max_attempts == 0 {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' gate on '{}' needs a positive interval and at least one attempt",
                    self.name,
                    gate.probe.component()
                ))
                .with_stages(vec![self.name.clone()]));
            }
        }
        Ok(())
    }
}
