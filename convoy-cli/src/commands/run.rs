use std::path::Path;

use anyhow::{Context, Result};
use convoy::config::Plan;
use convoy::core::ConsolidatedReport;
use convoy::pipeline::{RetryExecutor, RunReport, Sequencer};
use convoy::recorder::StatusRecorder;
use convoy::verification::Aggregator;
use tracing::{info, warn};

use super::{print_outcomes, print_report, Session};
use crate::exit;

/// What a finished `run` produced.
pub struct RunResult {
    pub run: RunReport,
    pub verification: Option<ConsolidatedReport>,
}

/// Execute the `run` command: stages, teardown, verification (unless the
/// run halted), then record everything.
pub async fn execute(pipeline_path: &Path, output_dir: Option<&Path>, verify: bool) -> Result<u8> {
    let session = Session::open(pipeline_path, output_dir)?;
    let RunResult { run, verification } =
        drive(&session.plan, &session.executor, &session.recorder, verify).await?;

    println!(
        "pipeline {}: {} (run {}, {}ms)",
        run.pipeline, run.state, run.run_id, run.duration_ms
    );
    print_outcomes("stages", &run.outcomes);
    if !run.not_dispatched.is_empty() {
        println!("not dispatched: {}", run.not_dispatched.join(", "));
    }
    print_outcomes("teardown", &run.teardown);
    if let Some(consolidated) = &verification {
        print_report(consolidated);
    }

    Ok(exit::for_run(run.state, verification.as_ref()))
}

/// Runs the plan and records its artifacts.
///
/// The run artifact is written before verification starts, so it exists
/// even when verification or its recording fails.
pub async fn drive(
    plan: &Plan,
    executor: &RetryExecutor,
    recorder: &StatusRecorder,
    verify: bool,
) -> Result<RunResult> {
    let sequencer = Sequencer::new(executor.clone());
    let mut run = sequencer.run(&plan.pipeline).await;
    run.teardown = sequencer.run_teardown(&plan.teardown).await;

    match recorder.record_run(&run) {
        Ok(path) => info!(path = %path.display(), "Run report recorded"),
        Err(e) => warn!(error = %e, "Failed to record run report"),
    }

    let verification = if run.halted() {
        info!(run_id = %run.run_id, "Run halted, skipping verification");
        None
    } else if !verify || plan.verifiers.is_empty() {
        None
    } else {
        let consolidated = Aggregator::new(executor.clone())
            .with_max_parallel(plan.max_parallel)
            .aggregate(&plan.verifiers)
            .await?;
        recorder
            .record_report(&consolidated)
            .context("Failed to record verification report")?;
        Some(consolidated)
    };

    Ok(RunResult { run, verification })
}
