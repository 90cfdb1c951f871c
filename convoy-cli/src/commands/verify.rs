use std::path::Path;

use anyhow::{Context, Result};
use convoy::errors::ConvoyError;

use super::{print_report, Session};
use crate::exit;

/// Execute the `verify` command: run the verifiers and record the
/// consolidated report.
pub async fn execute(pipeline_path: &Path, output_dir: Option<&Path>) -> Result<u8> {
    let session = Session::open(pipeline_path, output_dir)?;
    if session.plan.verifiers.is_empty() {
        return Err(ConvoyError::Config("no enabled verifiers in the pipeline".into()).into());
    }

    let report = session.aggregator().aggregate(&session.plan.verifiers).await?;
    let path = session
        .recorder
        .record_report(&report)
        .context("Failed to record verification report")?;

    print_report(&report);
    println!("recorded {}", path.display());
    Ok(exit::for_report(&report))
}
