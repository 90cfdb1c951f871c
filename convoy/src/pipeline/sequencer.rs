//! Stage sequencer and run state machine.
//!
//! Stages are dispatched strictly in declared order. A stage whose
//! dependencies did not all succeed is skipped, not attempted. The first
//! fatal (or cancelled) outcome halts the run: later stages are still
//! recorded as skipped when their dependencies failed, but nothing else is
//! dispatched. Teardown is the caller's explicit step.

use super::{Pipeline, RetryExecutor, Stage, StageOutcome};
use crate::core::{OutcomeKind, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Reason recorded for stages disabled by configuration.
pub const DISABLED_REASON: &str = "disabled";

/// Terminal summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Pipeline digest (see [`Pipeline::digest`]).
    pub pipeline_digest: String,
    /// Terminal run state.
    pub state: RunState,
    /// Outcomes of dispatched and skipped stages, in declared order.
    pub outcomes: Vec<StageOutcome>,
    /// Stages never reached because the run halted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_dispatched: Vec<String>,
    /// Outcomes of teardown stages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<StageOutcome>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Elapsed time in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    /// Looks up a stage outcome by name.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    /// Number of outcomes of the given kind.
    #[must_use]
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    /// Whether the run reached [`RunState::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Whether the run halted on a fatal or cancelled stage.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.outcomes.iter().any(|o| o.kind.halts_run())
    }
}

/// Derives the terminal run state from collected outcomes.
///
/// Any fatal or cancelled outcome makes the run `FailedFatal`; otherwise
/// any recoverable failure makes it `PartialSuccess`; otherwise it
/// `Succeeded`. Skips never degrade the state on their own.
#[must_use]
pub fn compute_run_state(outcomes: &[StageOutcome]) -> RunState {
    if outcomes.iter().any(|o| o.kind.halts_run()) {
        RunState::FailedFatal
    } else if outcomes
        .iter()
        .any(|o| o.kind == OutcomeKind::FailedRecoverable)
    {
        RunState::PartialSuccess
    } else {
        RunState::Succeeded
    }
}

/// Drives a pipeline through the executor.
#[derive(Debug, Clone)]
pub struct Sequencer {
    executor: RetryExecutor,
}

impl Sequencer {
    /// Creates a sequencer.
    #[must_use]
    pub fn new(executor: RetryExecutor) -> Self {
        Self { executor }
    }

    /// The underlying executor.
    #[must_use]
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Runs every stage of `pipeline` in declared order.
    pub async fn run(&self, pipeline: &Pipeline) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "run",
            component = "sequencer",
            run_id = %run_id,
            pipeline = %pipeline.name()
        );
        self.run_inner(run_id, pipeline).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, pipeline: &Pipeline) -> RunReport {
        let clock = self.executor.clock();
        let events = self.executor.events();
        let started_at = clock.now();
        let mut state = RunState::NotStarted;

        info!(stages = pipeline.len(), digest = %pipeline.digest(), "Run started");
        events.emit(
            "run.started",
            json!({
                "component": "sequencer",
                "run_id": run_id,
                "pipeline": pipeline.name(),
                "stages": pipeline.len(),
            }),
        );

        let mut outcomes: Vec<StageOutcome> = Vec::with_capacity(pipeline.len());
        let mut results: HashMap<&str, OutcomeKind> = HashMap::new();
        let mut not_dispatched = Vec::new();
        let mut halted = false;

        for stage in pipeline.stages() {
            if let Some(reason) = skip_reason(stage, &results) {
                info!(stage = %stage.name, reason = %reason, "Stage skipped");
                events.emit(
                    "stage.skipped",
                    json!({
                        "component": "sequencer",
                        "stage": &stage.name,
                        "reason": &reason,
                    }),
                );
                results.insert(&stage.name, OutcomeKind::Skipped);
                outcomes.push(StageOutcome::skipped(&stage.name, reason, clock.now()));
                continue;
            }

            if halted {
                not_dispatched.push(stage.name.clone());
                continue;
            }

            if state == RunState::NotStarted {
                debug!(stage = %stage.name, "First stage dispatched");
                state = RunState::Running;
            }

            events.emit(
                "stage.started",
                json!({
                    "component": "sequencer",
                    "stage": &stage.name,
                    "on_failure": stage.on_failure,
                    "run_state": state,
                }),
            );
            let outcome = self.executor.execute(stage).await;
            events.emit(
                "stage.completed",
                json!({
                    "component": "sequencer",
                    "stage": &stage.name,
                    "kind": outcome.kind,
                    "attempts": outcome.attempt_count(),
                    "failure": outcome.failure,
                }),
            );

            results.insert(&stage.name, outcome.kind);
            if outcome.kind.halts_run() {
                warn!(stage = %stage.name, kind = %outcome.kind, "Halting run");
                halted = true;
            }
            outcomes.push(outcome);
        }

        let state = compute_run_state(&outcomes);
        let finished_at = clock.now();
        let duration_ms =
            u64::try_from((finished_at - started_at).num_milliseconds()).unwrap_or(0);

        info!(state = %state, duration_ms, "Run finished");
        events.emit(
            "run.completed",
            json!({
                "component": "sequencer",
                "run_id": run_id,
                "state": state,
                "duration_ms": duration_ms,
            }),
        );

        RunReport {
            run_id,
            pipeline: pipeline.name().to_string(),
            pipeline_digest: pipeline.digest().to_string(),
            state,
            outcomes,
            not_dispatched,
            teardown: Vec::new(),
            started_at,
            finished_at,
            duration_ms,
        }
    }

    /// Dispatches every enabled teardown stage, regardless of how the main
    /// run ended. Failures never halt teardown.
    ///
    /// Teardown runs under its own cancellation token so an interrupted run
    /// still cleans up.
    pub async fn run_teardown(&self, stages: &[Stage]) -> Vec<StageOutcome> {
        let executor = self.executor.detached();
        let clock = executor.clock();
        let mut outcomes = Vec::with_capacity(stages.len());

        for stage in stages {
            if !stage.enabled {
                outcomes.push(StageOutcome::skipped(
                    &stage.name,
                    DISABLED_REASON,
                    clock.now(),
                ));
                continue;
            }
            let span = info_span!("teardown", component = "sequencer", stage = %stage.name);
            let outcome = executor.execute(stage).instrument(span).await;
            if !outcome.succeeded() {
                warn!(stage = %stage.name, kind = %outcome.kind, "Teardown stage did not succeed");
            }
            executor.events().emit(
                "stage.completed",
                json!({
                    "component": "sequencer",
                    "stage": &stage.name,
                    "teardown": true,
                    "kind": outcome.kind,
                }),
            );
            outcomes.push(outcome);
        }
        outcomes
    }
}

fn skip_reason(stage: &Stage, results: &HashMap<&str, OutcomeKind>) -> Option<String> {
    if !stage.enabled {
        return Some(DISABLED_REASON.to_string());
    }
    stage
        .depends_on
        .iter()
        .find(|dep| results.get(dep.as_str()) != Some(&OutcomeKind::Succeeded))
        .map(|dep| format!("dependency '{dep}' did not succeed"))
}
