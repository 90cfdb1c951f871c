use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use convoy::config::{load_plan, Env};
use convoy::runner::ProcessRunner;

use crate::exit;

/// Execute the `check` command: parse, apply overrides, validate and print
/// the resolved plan. Nothing is run.
pub fn execute(pipeline_path: &Path) -> Result<u8> {
    let plan = load_plan(pipeline_path, &Env::from_process(), Arc::new(ProcessRunner))
        .with_context(|| format!("Failed to load pipeline: {}", pipeline_path.display()))?;

    println!("{}", plan.describe());
    println!("\nPipeline is valid.");
    Ok(exit::SUCCESS)
}
