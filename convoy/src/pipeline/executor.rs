//! Retry/backoff executor for a single stage.
//!
//! Fatal stages run exactly once. Recoverable stages are re-invoked under
//! their [`RetryPolicy`](super::RetryPolicy) until they succeed or exhaust
//! their attempts. Every attempt is kept on the outcome, successful or not.

use super::Stage;
use crate::cancellation::CancellationToken;
use crate::clock::{sleep_unless_cancelled, Clock};
use crate::core::{FailureClass, OutcomeKind};
use crate::errors::{ConvoyError, FailureKind};
use crate::events::EventSink;
use crate::probe::{ProbeOutcome, ReadinessProber};
use crate::runner::{CommandOutput, CommandRunner};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// One invocation of a stage's action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-indexed attempt number.
    pub attempt: u32,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Duration of the command in milliseconds.
    pub duration_ms: u64,
    /// Whether the command hit its timeout.
    pub timed_out: bool,
    /// Set when the command could not be run at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backoff slept before the next attempt, if one followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_before_next_ms: Option<u64>,
}

impl AttemptRecord {
    fn from_output(attempt: u32, output: CommandOutput) -> Self {
        Self {
            attempt,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
            timed_out: output.timed_out,
            error: None,
            delay_before_next_ms: None,
        }
    }

    fn from_error(attempt: u32, error: String) -> Self {
        Self {
            attempt,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Result of one readiness gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRecord {
    /// The gated component.
    pub component: String,
    /// How the wait ended.
    pub outcome: ProbeOutcome,
}

/// Outcome of executing (or skipping) one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name.
    pub stage: String,
    /// What happened.
    pub kind: OutcomeKind,
    /// Every attempt, in order.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    /// Readiness gates waited on before the action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateRecord>,
    /// Failure classification, for failed stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Human-readable reason for a failure or skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When handling of the stage began.
    pub started_at: DateTime<Utc>,
    /// When handling of the stage ended.
    pub finished_at: DateTime<Utc>,
}

impl StageOutcome {
    /// A stage that was never attempted.
    #[must_use]
    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            stage: stage.into(),
            kind: OutcomeKind::Skipped,
            attempts: Vec::new(),
            gates: Vec::new(),
            failure: None,
            reason: Some(reason.into()),
            started_at: at,
            finished_at: at,
        }
    }

    /// Number of times the action was invoked.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Whether the stage succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.kind == OutcomeKind::Succeeded
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0)
    }
}

/// Runs stages through the command runner under their retry policy.
#[derive(Clone)]
pub struct RetryExecutor {
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    prober: ReadinessProber,
}

impl RetryExecutor {
    /// Creates an executor; gates are probed with a prober sharing the same
    /// clock, sink and token.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        let prober = ReadinessProber::new(clock.clone(), events.clone(), cancel.clone());
        Self {
            runner,
            clock,
            events,
            cancel,
            prober,
        }
    }

    /// A copy of this executor under a fresh, uncancelled token.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self::new(
            self.runner.clone(),
            self.clock.clone(),
            self.events.clone(),
            Arc::new(CancellationToken::new()),
        )
    }

    /// Replaces the prober used for readiness gates.
    #[must_use]
    pub fn with_prober(mut self, prober: ReadinessProber) -> Self {
        self.prober = prober;
        self
    }

    /// The clock used for timestamps and backoff.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// The cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Executes a stage: waits on its gates, then runs its action.
    ///
    /// Never fails; every problem is reported in the returned outcome.
    pub async fn execute(&self, stage: &Stage) -> StageOutcome {
        let span = info_span!("stage", component = "executor", stage = %stage.name);
        self.execute_inner(stage).instrument(span).await
    }

    async fn execute_inner(&self, stage: &Stage) -> StageOutcome {
        let mut outcome = StageOutcome {
            stage: stage.name.clone(),
            kind: OutcomeKind::Succeeded,
            attempts: Vec::new(),
            gates: Vec::new(),
            failure: None,
            reason: None,
            started_at: self.clock.now(),
            finished_at: self.clock.now(),
        };

        if let Some((kind, failure, reason)) = self.wait_for_gates(stage, &mut outcome.gates).await
        {
            return self.finish(outcome, kind, failure, Some(reason));
        }

        let max_attempts = match stage.on_failure {
            FailureClass::Fatal => 1,
            FailureClass::Recoverable => stage.retry_policy.max_attempts.max(1),
        };

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                let reason = self.cancel_reason();
                return self.finish(outcome, OutcomeKind::Cancelled, None, Some(reason));
            }

            let ran = AssertUnwindSafe(self.runner.run(&stage.action))
                .catch_unwind()
                .await;
            let (record, failure_reason) = match ran {
                Ok(Ok(output)) if output.succeeded() => {
                    outcome
                        .attempts
                        .push(AttemptRecord::from_output(attempt, output));
                    info!(attempt, "Stage succeeded");
                    return self.finish(outcome, OutcomeKind::Succeeded, None, None);
                }
                Ok(Ok(output)) => {
                    let reason = output.describe_failure();
                    (AttemptRecord::from_output(attempt, output), reason)
                }
                Ok(Err(error)) => {
                    let reason = error.to_string();
                    (AttemptRecord::from_error(attempt, reason.clone()), reason)
                }
                Err(_) => {
                    let reason = "command runner panicked".to_string();
                    (AttemptRecord::from_error(attempt, reason.clone()), reason)
                }
            };
            outcome.attempts.push(record);

            warn!(attempt, max_attempts, reason = %failure_reason, "Stage attempt failed");
            self.events.emit(
                "stage.attempt_failed",
                json!({
                    "component": "executor",
                    "stage": &stage.name,
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "reason": &failure_reason,
                }),
            );

            if stage.on_failure == FailureClass::Fatal {
                return self.finish(
                    outcome,
                    OutcomeKind::FailedFatal,
                    Some(FailureKind::FatalStageFailure),
                    Some(failure_reason),
                );
            }

            if attempt == max_attempts {
                return self.finish(
                    outcome,
                    OutcomeKind::FailedRecoverable,
                    Some(FailureKind::RecoverableStageFailure),
                    Some(format!(
                        "failed after {max_attempts} attempt(s): {failure_reason}"
                    )),
                );
            }

            let delay = stage.retry_policy.delay_after(attempt);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            if let Some(last) = outcome.attempts.last_mut() {
                last.delay_before_next_ms = Some(delay_ms);
            }
            info!(attempt, delay_ms, "Retrying stage after backoff");
            self.events.emit(
                "stage.retrying",
                json!({
                    "component": "executor",
                    "stage": &stage.name,
                    "attempt": attempt,
                    "delay_ms": delay_ms,
                }),
            );

            if let Err(ConvoyError::Cancelled(reason)) =
                sleep_unless_cancelled(self.clock.as_ref(), delay, &self.cancel).await
            {
                return self.finish(outcome, OutcomeKind::Cancelled, None, Some(reason));
            }
        }

        // max_attempts >= 1, so the loop always returns.
        let reason = "no attempts were made".to_string();
        self.finish(
            outcome,
            OutcomeKind::FailedRecoverable,
            Some(FailureKind::RecoverableStageFailure),
            Some(reason),
        )
    }

    /// Waits on each gate in order. Returns the terminal classification if a
    /// gate did not become ready.
    async fn wait_for_gates(
        &self,
        stage: &Stage,
        records: &mut Vec<GateRecord>,
    ) -> Option<(OutcomeKind, Option<FailureKind>, String)> {
        for gate in &stage.gates {
            let component = gate.probe.component().to_string();
            let waited = self
                .prober
                .wait_ready(gate.probe.as_ref(), gate.interval, gate.max_attempts)
                .await;

            let outcome = match waited {
                Ok(outcome) => outcome,
                Err(error) => {
                    let (kind, failure) = classify(stage.on_failure);
                    return Some((kind, Some(failure), error.to_string()));
                }
            };
            records.push(GateRecord {
                component: component.clone(),
                outcome: outcome.clone(),
            });

            match outcome {
                ProbeOutcome::Ready { .. } => {}
                ProbeOutcome::TimedOut { attempts, last_error } => {
                    let error = ConvoyError::ProbeTimeout {
                        component,
                        attempts,
                    };
                    let reason = match last_error {
                        Some(last) => format!("{error}: {last}"),
                        None => error.to_string(),
                    };
                    let (kind, _) = classify(stage.on_failure);
                    return Some((kind, Some(FailureKind::ProbeTimeout), reason));
                }
                ProbeOutcome::Cancelled { .. } => {
                    return Some((OutcomeKind::Cancelled, None, self.cancel_reason()));
                }
            }
        }
        None
    }

    fn finish(
        &self,
        mut outcome: StageOutcome,
        kind: OutcomeKind,
        failure: Option<FailureKind>,
        reason: Option<String>,
    ) -> StageOutcome {
        outcome.kind = kind;
        outcome.failure = failure;
        outcome.reason = reason;
        outcome.finished_at = self.clock.now();
        outcome
    }

    fn cancel_reason(&self) -> String {
        self.cancel
            .reason()
            .unwrap_or_else(|| "cancelled".to_string())
    }
}

fn classify(class: FailureClass) -> (OutcomeKind, FailureKind) {
    match class {
        FailureClass::Fatal => (OutcomeKind::FailedFatal, FailureKind::FatalStageFailure),
        FailureClass::Recoverable => (
            OutcomeKind::FailedRecoverable,
            FailureKind::RecoverableStageFailure,
        ),
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("prober", &self.prober)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CommandError;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{ReadinessGate, RetryPolicy};
    use crate::runner::{CommandSpec, MockCommandRunner};
    use crate::testing::{ManualClock, ScriptedProbe, ScriptedRunner};
    use std::time::Duration;

    struct Harness {
        runner: Arc<ScriptedRunner>,
        clock: Arc<ManualClock>,
        sink: Arc<CollectingEventSink>,
        cancel: Arc<CancellationToken>,
        executor: RetryExecutor,
    }

    fn harness() -> Harness {
        let runner = Arc::new(ScriptedRunner::new());
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingEventSink::new());
        let cancel = Arc::new(CancellationToken::new());
        let executor = RetryExecutor::new(
            runner.clone(),
            clock.clone(),
            sink.clone(),
            cancel.clone(),
        );
        Harness {
            runner,
            clock,
            sink,
            cancel,
            executor,
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let h = harness();
        let stage = Stage::new("build", CommandSpec::new("make"));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::Succeeded);
        assert_eq!(outcome.attempt_count(), 1);
        assert!(outcome.failure.is_none());
        assert_eq!(h.runner.call_count("make"), 1);
    }

    #[tokio::test]
    async fn test_fatal_stage_is_never_retried() {
        let h = harness();
        h.runner.always("make", CommandOutput::failure(2, "compile error"));
        let stage = Stage::new("build", CommandSpec::new("make"))
            .fatal()
            .with_retry_policy(policy(5));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::FailedFatal);
        assert_eq!(outcome.failure, Some(FailureKind::FatalStageFailure));
        assert_eq!(h.runner.call_count("make"), 1);
        assert!(h.clock.sleeps().is_empty());
        assert_eq!(outcome.reason.as_deref(), Some("exit code 2: compile error"));
    }

    #[tokio::test]
    async fn test_recoverable_stage_invoked_max_attempts_times() {
        for n in 1..=4 {
            let h = harness();
            h.runner.always("load", CommandOutput::failure(1, "broker unavailable"));
            let stage = Stage::new("load", CommandSpec::new("load"))
                .recoverable()
                .with_retry_policy(policy(n));

            let outcome = h.executor.execute(&stage).await;

            assert_eq!(outcome.kind, OutcomeKind::FailedRecoverable);
            assert_eq!(outcome.failure, Some(FailureKind::RecoverableStageFailure));
            assert_eq!(h.runner.call_count("load"), n as usize);
            assert_eq!(outcome.attempt_count(), n as usize);
            assert_eq!(h.clock.sleeps().len(), (n - 1) as usize);
        }
    }

    #[tokio::test]
    async fn test_recoverable_succeeds_on_third_attempt() {
        let h = harness();
        h.runner.push("seed", CommandOutput::failure(1, "first"));
        h.runner.push("seed", CommandOutput::failure(1, "second"));
        h.runner.push("seed", CommandOutput::success("seeded"));
        let stage = Stage::new("seed", CommandSpec::new("seed"))
            .recoverable()
            .with_retry_policy(policy(3));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::Succeeded);
        assert_eq!(h.runner.call_count("seed"), 3);
        assert_eq!(
            h.clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );

        // Earlier failures stay attached after the eventual success.
        let stderr: Vec<_> = outcome.attempts.iter().map(|a| a.stderr.as_str()).collect();
        assert_eq!(stderr, vec!["first", "second", ""]);
        assert_eq!(outcome.attempts[2].stdout, "seeded");
        assert_eq!(outcome.attempts[0].delay_before_next_ms, Some(100));
        assert_eq!(outcome.attempts[1].delay_before_next_ms, Some(200));
        assert_eq!(outcome.attempts[2].delay_before_next_ms, None);
        assert_eq!(h.sink.events_of_type("stage.retrying").len(), 2);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_sleeps() {
        let h = harness();
        h.runner.always("import", CommandOutput::failure(1, ""));
        let stage = Stage::new("import", CommandSpec::new("import"))
            .recoverable()
            .with_retry_policy(RetryPolicy::once());

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::FailedRecoverable);
        assert_eq!(h.runner.call_count("import"), 1);
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_error_counts_as_failed_attempt() {
        let h = harness();
        h.runner.push_error(
            "missing-tool",
            CommandError::Spawn {
                program: "missing-tool".into(),
                message: "No such file or directory".into(),
            },
        );
        let stage = Stage::new("tool", CommandSpec::new("missing-tool"))
            .recoverable()
            .with_retry_policy(policy(2));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::Succeeded);
        assert_eq!(outcome.attempt_count(), 2);
        assert!(outcome.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("No such file"));
        assert_eq!(outcome.attempts[0].exit_code, None);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt() {
        let h = harness();
        h.cancel.cancel("operator interrupt");
        let stage = Stage::new("build", CommandSpec::new("make"));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        assert_eq!(outcome.reason.as_deref(), Some("operator interrupt"));
        assert_eq!(h.runner.call_count("make"), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_retries_stops_further_attempts() {
        let h = harness();
        let cancel = h.cancel.clone();
        h.runner.always_with("flaky", move |_| {
            cancel.cancel("stop");
            Ok(CommandOutput::failure(1, "nope"))
        });
        let stage = Stage::new("flaky", CommandSpec::new("flaky"))
            .recoverable()
            .with_retry_policy(policy(5));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
        assert_eq!(h.runner.call_count("flaky"), 1);
    }

    #[tokio::test]
    async fn test_gate_timeout_on_fatal_stage_skips_action() {
        let h = harness();
        let probe = Arc::new(ScriptedProbe::never_ready("kafka"));
        let stage = Stage::new("topics", CommandSpec::new("create-topics"))
            .fatal()
            .wait_for(ReadinessGate::new(probe.clone(), Duration::from_secs(2), 3));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::FailedFatal);
        assert_eq!(outcome.failure, Some(FailureKind::ProbeTimeout));
        assert_eq!(probe.calls(), 3);
        assert_eq!(h.runner.call_count("create-topics"), 0);
        assert!(outcome.reason.unwrap().contains("'kafka' not ready after 3"));
        assert_eq!(outcome.gates.len(), 1);
    }

    #[tokio::test]
    async fn test_gate_timeout_on_recoverable_stage() {
        let h = harness();
        let stage = Stage::new("dashboards", CommandSpec::new("provision"))
            .recoverable()
            .wait_for(ReadinessGate::new(
                Arc::new(ScriptedProbe::never_ready("grafana")),
                Duration::from_secs(1),
                2,
            ));

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::FailedRecoverable);
        assert_eq!(outcome.failure, Some(FailureKind::ProbeTimeout));
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_ready_gate_then_action() {
        let h = harness();
        let stage = Stage::new("schema", CommandSpec::new("apply-schema")).wait_for(
            ReadinessGate::new(
                Arc::new(ScriptedProbe::ready_after("clickhouse", 2)),
                Duration::from_secs(2),
                10,
            ),
        );

        let outcome = h.executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::Succeeded);
        assert_eq!(
            outcome.gates[0].outcome,
            ProbeOutcome::Ready {
                attempts: 3,
                waited_ms: 4000
            }
        );
        assert_eq!(h.runner.call_count("apply-schema"), 1);
    }

    #[tokio::test]
    async fn test_with_mock_runner() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|spec: &CommandSpec| spec.program == "docker")
            .times(1)
            .returning(|_| Ok(CommandOutput::failure(125, "daemon not running")));

        let executor = RetryExecutor::new(
            Arc::new(mock),
            Arc::new(ManualClock::new()),
            Arc::new(CollectingEventSink::new()),
            Arc::new(CancellationToken::new()),
        );
        let stage = Stage::new("up", CommandSpec::from_argv(["docker", "compose", "up"]))
            .with_retry_policy(policy(3));

        let outcome = executor.execute(&stage).await;

        assert_eq!(outcome.kind, OutcomeKind::FailedFatal);
        assert_eq!(outcome.attempts[0].exit_code, Some(125));
    }
}
