use std::path::{Path, PathBuf};

use anyhow::Result;
use convoy::config::OutputConfig;

use super::recorder;
use crate::exit;

/// Execute the `status` command: print the latest recorded report as JSON.
pub fn execute(output_dir: Option<&Path>, run: bool) -> Result<u8> {
    let dir = output_dir.map_or_else(default_output_dir, Path::to_path_buf);
    let recorder = recorder(&dir, None);

    if run {
        let Some(report) = recorder.load_latest_run()? else {
            eprintln!("no run report recorded in {}", dir.display());
            return Ok(exit::VERIFICATION_FAILED);
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(exit::for_run(report.state, None));
    }

    let Some(report) = recorder.load_latest_report()? else {
        eprintln!("no verification report recorded in {}", dir.display());
        return Ok(exit::VERIFICATION_FAILED);
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit::for_report(&report))
}

fn default_output_dir() -> PathBuf {
    std::env::var_os("CONVOY_OUTPUT_DIR")
        .map_or_else(|| OutputConfig::default().dir, PathBuf::from)
}
