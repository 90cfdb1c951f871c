//! Durable status artifacts.
//!
//! Every report is written twice: once under a timestamped name and once
//! under a stable `*-latest.json` alias. Both writes go to a temp file in the
//! output directory that is then renamed over the target, so a reader of the
//! alias never observes a half-written document.

use crate::core::ConsolidatedReport;
use crate::errors::{ConvoyError, Result};
use crate::pipeline::RunReport;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// File-name prefix of consolidated verification reports.
pub const VERIFICATION_PREFIX: &str = "verification";

/// File-name prefix of run reports.
pub const RUN_PREFIX: &str = "run";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Persists reports into one output directory.
#[derive(Debug, Clone)]
pub struct StatusRecorder {
    dir: PathBuf,
    keep_last: Option<usize>,
}

impl StatusRecorder {
    /// Creates a recorder writing into `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            keep_last: None,
        }
    }

    /// Keeps only the newest `n` timestamped artifacts of each kind.
    /// Aliases are never pruned. `0` disables pruning.
    #[must_use]
    pub fn with_keep_last(mut self, n: usize) -> Self {
        self.keep_last = (n > 0).then_some(n);
        self
    }

    /// The output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the stable alias for `prefix`.
    #[must_use]
    pub fn latest_path(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{prefix}-latest.json"))
    }

    /// Writes a consolidated report and repoints its alias.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Recorder`] if either file cannot be written.
    pub fn record_report(&self, report: &ConsolidatedReport) -> Result<PathBuf> {
        self.record(VERIFICATION_PREFIX, report.timestamp, report)
    }

    /// Writes a run report and repoints its alias.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Recorder`] if either file cannot be written.
    pub fn record_run(&self, run: &RunReport) -> Result<PathBuf> {
        self.record(RUN_PREFIX, run.finished_at, run)
    }

    /// Loads the report behind the verification alias, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias exists but cannot be read or parsed.
    pub fn load_latest_report(&self) -> Result<Option<ConsolidatedReport>> {
        self.load_latest(VERIFICATION_PREFIX)
    }

    /// Loads the run behind the run alias, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the alias exists but cannot be read or parsed.
    pub fn load_latest_run(&self) -> Result<Option<RunReport>> {
        self.load_latest(RUN_PREFIX)
    }

    /// Timestamped artifacts for `prefix`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn history(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(recorder_error("list", &self.dir, &e)),
        };

        let mut found: Vec<((String, u32), PathBuf)> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let key = history_key(prefix, &name)?;
                Some((key, entry.path()))
            })
            .collect();
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    fn record<T: Serialize>(&self, prefix: &str, at: DateTime<Utc>, value: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| recorder_error("create", &self.dir, &e))?;
        let body = serde_json::to_vec_pretty(value)?;

        let path = self.unique_path(prefix, at);
        write_atomic(&self.dir, &path, &body)?;
        write_atomic(&self.dir, &self.latest_path(prefix), &body)?;
        info!(component = "recorder", path = %path.display(), "Recorded status artifact");

        if let Some(keep) = self.keep_last {
            self.prune(prefix, keep);
        }
        Ok(path)
    }

    fn unique_path(&self, prefix: &str, at: DateTime<Utc>) -> PathBuf {
        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        let base = self.dir.join(format!("{prefix}-{stamp}.json"));
        if !base.exists() {
            return base;
        }
        (1u32..)
            .map(|n| self.dir.join(format!("{prefix}-{stamp}-{n}.json")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }

    fn prune(&self, prefix: &str, keep: usize) {
        let history = match self.history(prefix) {
            Ok(history) => history,
            Err(e) => {
                warn!(component = "recorder", error = %e, "Could not list artifacts for pruning");
                return;
            }
        };
        let excess = history.len().saturating_sub(keep);
        for path in &history[..excess] {
            match fs::remove_file(path) {
                Ok(()) => debug!(component = "recorder", path = %path.display(), "Pruned artifact"),
                Err(e) => warn!(
                    component = "recorder",
                    path = %path.display(),
                    error = %e,
                    "Could not prune artifact"
                ),
            }
        }
    }

    fn load_latest<T: DeserializeOwned>(&self, prefix: &str) -> Result<Option<T>> {
        let path = self.latest_path(prefix);
        match fs::read(&path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(recorder_error("read", &path, &e)),
        }
    }
}

/// Writes `body` to `path` via a temp file in `dir` and a rename.
fn write_atomic(dir: &Path, path: &Path, body: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| recorder_error("create temp in", dir, &e))?;
    tmp.write_all(body)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| recorder_error("write", tmp.path(), &e))?;
    tmp.persist(path)
        .map_err(|e| recorder_error("persist", path, &e.error))?;
    Ok(())
}

/// Sort key of a timestamped artifact name, or `None` for aliases and
/// unrelated files.
fn history_key(prefix: &str, name: &str) -> Option<(String, u32)> {
    let stem = name
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .strip_suffix(".json")?;
    if stem == "latest" {
        return None;
    }
    match stem.split_once('-') {
        Some((stamp, n)) => Some((stamp.to_string(), n.parse().ok()?)),
        None => Some((stem.to_string(), 0)),
    }
}

fn recorder_error(action: &str, path: &Path, error: &io::Error) -> ConvoyError {
    ConvoyError::Recorder(format!("failed to {action} {}: {error}", path.display()))
}
