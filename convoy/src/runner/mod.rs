//! External command execution.
//!
//! Stage actions, verifier commands and command probes are all opaque external
//! commands consumed only via their exit code and captured output.

use crate::errors::CommandError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// An opaque external command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Kill the command after this long.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Creates a command from an argv list; the first element is the program.
    #[must_use]
    pub fn from_argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = argv.into_iter().map(Into::into);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
            ..Self::default()
        }
    }

    /// Runs a script through `sh -c`.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::from_argv(["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Renders the command line for logs.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of running a command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal or timeout.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the command was killed for exceeding its timeout.
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// A failed output with the given exit code and stderr.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Whether the command exited zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// The last `max_lines` non-empty lines of stderr.
    #[must_use]
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        tail_lines(&self.stderr, max_lines)
    }

    /// One-line description of a failed run.
    #[must_use]
    pub fn describe_failure(&self) -> String {
        let head = match (self.timed_out, self.exit_code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => format!("exit code {code}"),
            (false, None) => "terminated by signal".to_string(),
        };
        let tail = self.stderr_tail(STDERR_TAIL_LINES);
        if tail.is_empty() {
            head
        } else {
            format!("{head}: {tail}")
        }
    }
}

/// Number of stderr lines kept in failure summaries.
pub const STDERR_TAIL_LINES: usize = 5;

/// The last `max_lines` non-empty lines of `text`.
#[must_use]
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(max_lines);
    lines[skip..].join("\n")
}

/// Executes commands.
///
/// Never fails on a non-zero exit; only an inability to run the command at
/// all is an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion and captures its output.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        if spec.program.trim().is_empty() {
            return Err(CommandError::Empty(spec.display()));
        }

        let start = Instant::now();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        debug!(command = %spec.display(), "Spawning command");
        let child = command.spawn().map_err(|e| CommandError::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;

        let waited = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    // Dropping the future drops the child, which kills it.
                    return Ok(CommandOutput {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("timed out after {}s", limit.as_secs_f64()),
                        duration_ms: elapsed_ms(start),
                        timed_out: true,
                    });
                }
            },
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|e| CommandError::Wait {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: elapsed_ms(start),
            timed_out: false,
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
