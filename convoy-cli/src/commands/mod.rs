pub mod check;
pub mod run;
pub mod status;
pub mod verify;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use convoy::cancellation::CancellationToken;
use convoy::clock::SystemClock;
use convoy::config::{load_plan, Env, Plan};
use convoy::events::LoggingEventSink;
use convoy::pipeline::{RetryExecutor, StageOutcome};
use convoy::recorder::StatusRecorder;
use convoy::runner::{CommandRunner, ProcessRunner};
use convoy::verification::Aggregator;
use tracing::{warn, Level};

/// A loaded plan plus the runtime pieces every command shares.
pub struct Session {
    pub plan: Plan,
    pub executor: RetryExecutor,
    pub recorder: StatusRecorder,
}

impl Session {
    /// Loads the pipeline file and wires the process runner, the system
    /// clock and a Ctrl-C cancellation token.
    pub fn open(pipeline_path: &Path, output_dir: Option<&Path>) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let mut plan = load_plan(pipeline_path, &Env::from_process(), runner.clone())
            .with_context(|| format!("Failed to load pipeline: {}", pipeline_path.display()))?;
        if let Some(dir) = output_dir {
            plan.output_dir = dir.to_path_buf();
        }

        let cancel = Arc::new(CancellationToken::new());
        cancel_on_ctrl_c(cancel.clone());

        let executor = RetryExecutor::new(
            runner,
            Arc::new(SystemClock),
            Arc::new(LoggingEventSink::new(Level::DEBUG)),
            cancel,
        );
        let recorder = recorder(&plan.output_dir, plan.keep_last);
        Ok(Self {
            plan,
            executor,
            recorder,
        })
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.executor.clone()).with_max_parallel(self.plan.max_parallel)
    }
}

pub fn recorder(dir: &Path, keep_last: Option<usize>) -> StatusRecorder {
    StatusRecorder::new(dir).with_keep_last(keep_last.unwrap_or(0))
}

fn cancel_on_ctrl_c(cancel: Arc<CancellationToken>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the run");
            cancel.cancel("interrupted");
        }
    });
}

pub fn print_outcomes(title: &str, outcomes: &[StageOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    println!("{title}:");
    for outcome in outcomes {
        let mut line = format!(
            "  {:<24} {:<20} {} attempt(s), {}ms",
            outcome.stage,
            outcome.kind.to_string(),
            outcome.attempt_count(),
            outcome.duration_ms()
        );
        if let Some(reason) = &outcome.reason {
            line.push_str(" - ");
            line.push_str(reason.lines().next().unwrap_or_default());
        }
        println!("{line}");
    }
}

pub fn print_report(report: &convoy::core::ConsolidatedReport) {
    println!(
        "verification: {} component(s), {} ok, {} warning, {} error, {} skipped{}",
        report.summary.total,
        report.summary.success_count,
        report.summary.warning_count,
        report.summary.failed_count,
        report.summary.skipped_count,
        if report.all_passed() { " (all passed)" } else { "" }
    );
    for (component, result) in &report.components {
        let message = result.message().unwrap_or_default();
        println!("  {component:<24} {:<8} {message}", result.status.to_string());
    }
}
