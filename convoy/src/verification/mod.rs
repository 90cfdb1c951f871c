//! Verification aggregation.
//!
//! Each [`Verifier`] is an independent command that inspects one component
//! and writes a [`ProbeResult`] artifact. The [`Aggregator`] runs them, reads
//! their artifacts and merges everything into one [`ConsolidatedReport`].
//! A missing or malformed artifact is recorded for that component only;
//! aggregation never fails fast on one component's problem.

mod artifact;


pub use artifact::{
    malformed_result, parse_artifact, read_artifact, Artifact, MALFORMED_REPORT, NO_REPORT,
};

use crate::core::{ConsolidatedReport, OutcomeKind, ProbeResult, ProbeStatus};
use crate::errors::{ContractErrorInfo, PipelineValidationError, Result};
use crate::pipeline::{RetryExecutor, RetryPolicy, Stage, StageOutcome};
use crate::runner::{tail_lines, CommandSpec, STDERR_TAIL_LINES};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// An independent component verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verifier {
    /// Component name; the key in the consolidated report.
    pub component: String,
    /// Command that inspects the component and writes the artifact.
    pub command: CommandSpec,
    /// Where the command writes its [`ProbeResult`] artifact.
    pub report_path: PathBuf,
    /// Retry policy for the command.
    pub retry_policy: RetryPolicy,
}

impl Verifier {
    /// Creates a verifier that runs once.
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        command: CommandSpec,
        report_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            component: component.into(),
            command,
            report_path: report_path.into(),
            retry_policy: RetryPolicy::once(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn as_stage(&self) -> Stage {
        Stage::new(format!("verify:{}", self.component), self.command.clone())
            .recoverable()
            .with_retry_policy(self.retry_policy)
    }
}

/// Validates a verifier set: non-empty, unique component names and valid
/// retry policies.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_verifiers(verifiers: &[Verifier]) -> Result<(), PipelineValidationError> {
    let mut seen = HashSet::new();
    for verifier in verifiers {
        if verifier.component.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Verifier component name cannot be empty",
            ));
        }
        if !seen.insert(verifier.component.as_str()) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate verifier component '{}'",
                verifier.component
            ))
            .with_stages(vec![verifier.component.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONVOY-005-DUPLICATE_COMPONENT",
                    format!("Component '{}' has more than one verifier", verifier.component),
                )
                .with_fix_hint("Merge the checks into one verifier or rename a component."),
            ));
        }
        verifier.retry_policy.validate(&verifier.component)?;
    }
    Ok(())
}

/// Runs verifiers and merges their artifacts.
#[derive(Debug, Clone)]
pub struct Aggregator {
    executor: RetryExecutor,
    max_parallel: usize,
}

impl Aggregator {
    /// Creates a sequential aggregator.
    #[must_use]
    pub fn new(executor: RetryExecutor) -> Self {
        Self {
            executor,
            max_parallel: 1,
        }
    }

    /// Sets how many verifiers may run at once; `0` is treated as `1`.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Runs every verifier and builds the consolidated report.
    ///
    /// The report depends only on the set of per-component results, never on
    /// the order in which verifiers finished.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::ConvoyError::Validation`] if the verifier set
    /// is invalid. Individual verifier problems are recorded, not returned.
    pub async fn aggregate(&self, verifiers: &[Verifier]) -> Result<ConsolidatedReport> {
        validate_verifiers(verifiers)?;
        let span = info_span!("aggregate", component = "aggregator", verifiers = verifiers.len());
        let results = if self.max_parallel <= 1 {
            self.run_sequential(verifiers).instrument(span).await
        } else {
            self.run_parallel(verifiers).instrument(span).await
        };

        let report = ConsolidatedReport::new(self.executor.clock().now(), results);
        info!(
            component = "aggregator",
            total = report.summary.total,
            success = report.summary.success_count,
            failed = report.summary.failed_count,
            all_passed = report.summary.all_passed,
            "Verification aggregated"
        );
        Ok(report)
    }

    async fn run_sequential(&self, verifiers: &[Verifier]) -> BTreeMap<String, ProbeResult> {
        let mut results = BTreeMap::new();
        for verifier in verifiers {
            let result = self.verify_guarded(verifier).await;
            results.insert(verifier.component.clone(), result);
        }
        results
    }

    async fn run_parallel(&self, verifiers: &[Verifier]) -> BTreeMap<String, ProbeResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for verifier in verifiers.iter().cloned() {
            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = this.verify_guarded(&verifier).await;
                    (verifier.component, result)
                }
                .in_current_span(),
            );
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((component, result)) => {
                    results.insert(component, result);
                }
                Err(e) => warn!(error = %e, "Verifier task did not complete"),
            }
        }

        // A task that never completed still gets an entry.
        for verifier in verifiers {
            results.entry(verifier.component.clone()).or_insert_with(|| {
                ProbeResult::at(
                    &verifier.component,
                    ProbeStatus::Error,
                    self.executor.clock().now(),
                    json!({ "message": "verifier task did not complete" }),
                )
            });
        }
        results
    }

    async fn verify_guarded(&self, verifier: &Verifier) -> ProbeResult {
        match AssertUnwindSafe(self.verify(verifier)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => ProbeResult::at(
                &verifier.component,
                ProbeStatus::Error,
                self.executor.clock().now(),
                json!({ "message": "verifier panicked" }),
            ),
        }
    }

    /// Runs one verifier and classifies its artifact.
    pub async fn verify(&self, verifier: &Verifier) -> ProbeResult {
        let component = verifier.component.as_str();
        remove_stale(verifier).await;

        let outcome = self.executor.execute(&verifier.as_stage()).await;
        let now = self.executor.clock().now();

        let result = match read_artifact(&verifier.report_path).await {
            Artifact::Missing => {
                debug!(component, path = %verifier.report_path.display(), "No artifact");
                ProbeResult::at(component, ProbeStatus::Skipped, now, missing_detail(&outcome))
            }
            Artifact::Malformed { error, raw } => {
                warn!(component, error = %error, "Malformed verifier artifact");
                malformed_result(component, &error, &raw, now)
            }
            Artifact::Parsed(mut result) => {
                if result.component.is_empty() {
                    result.component = component.to_string();
                } else if result.component != component {
                    warn!(
                        component,
                        reported = %result.component,
                        "Artifact names a different component; keyed by verifier"
                    );
                    let reported = std::mem::replace(&mut result.component, component.to_string());
                    result
                        .extra
                        .insert("reported_component".to_string(), json!(reported));
                }
                result
            }
        };

        info!(component, status = %result.status, "Verifier completed");
        self.executor.events().emit(
            "verifier.completed",
            json!({
                "component": component,
                "status": result.status,
                "attempts": outcome.attempt_count(),
                "command_kind": outcome.kind,
            }),
        );
        result
    }
}

async fn remove_stale(verifier: &Verifier) {
    match tokio::fs::remove_file(&verifier.report_path).await {
        Ok(()) => debug!(
            component = %verifier.component,
            path = %verifier.report_path.display(),
            "Removed stale artifact"
        ),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            component = %verifier.component,
            error = %e,
            "Could not remove stale artifact"
        ),
    }
}

fn missing_detail(outcome: &StageOutcome) -> serde_json::Value {
    let mut detail = json!({ "message": NO_REPORT });
    if outcome.kind == OutcomeKind::Cancelled {
        detail["cancelled"] = json!(true);
    }
    if let Some(last) = outcome.attempts.last() {
        if last.exit_code != Some(0) || last.error.is_some() {
            detail["exit_code"] = json!(last.exit_code);
            let tail = tail_lines(&last.stderr, STDERR_TAIL_LINES);
            if !tail.is_empty() {
                detail["stderr"] = json!(tail);
            }
            if let Some(error) = &last.error {
                detail["error"] = json!(error);
            }
        }
    }
    detail
}
