//! `convoy`: bring up a data platform, verify it, record the result.

mod commands;
mod exit;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use convoy::observability::{init_logging, LogOptions};

#[derive(Parser)]
#[command(
    name = "convoy",
    version,
    about = "Deployment and verification pipeline coordinator"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true, env = "CONVOY_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CONVOY_JSON_LOGS")]
    json_logs: bool,

    /// Write all logs of this run to a file instead of stderr
    #[arg(long, global = true, env = "CONVOY_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Status artifact directory (overrides the pipeline file)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stages, teardown and verification, then record the result
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Skip verification after the stages
        #[arg(long)]
        no_verify: bool,
    },
    /// Run only the verifiers and record the consolidated report
    Verify {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Validate the pipeline file and print the resolved plan
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Print the latest consolidated report
    Status {
        /// Print the latest run report instead
        #[arg(long)]
        run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = LogOptions {
        level: cli.log_level,
        json: cli.json_logs,
        file: cli.log_file,
    };
    if let Err(e) = init_logging(&options) {
        eprintln!("convoy: {e}");
        return exit::USAGE.into();
    }

    let output_dir = cli.output_dir.as_deref();
    let result = match cli.command {
        Commands::Run {
            pipeline,
            no_verify,
        } => commands::run::execute(&pipeline, output_dir, !no_verify).await,
        Commands::Verify { pipeline } => commands::verify::execute(&pipeline, output_dir).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
        Commands::Status { run } => commands::status::execute(output_dir, run),
    };

    match result {
        Ok(code) => code.into(),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "convoy failed");
            eprintln!("convoy: {e:#}");
            exit::for_error(&e).into()
        }
    }
}
