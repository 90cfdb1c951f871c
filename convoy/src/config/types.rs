//! Pipeline YAML configuration types.

use crate::core::FailureClass;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub pipeline: String,
    /// Defaults applied to every stage and verifier.
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Stages, in execution order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Stages run after the main sequence regardless of its outcome.
    #[serde(default)]
    pub teardown: Vec<StageConfig>,
    /// Component verifiers.
    #[serde(default)]
    pub verifiers: Vec<VerifierConfig>,
    /// Readiness gate defaults.
    #[serde(default)]
    pub probes: ProbeDefaults,
    /// Status artifact output.
    #[serde(default)]
    pub output: OutputConfig,
    /// Verification behavior.
    #[serde(default)]
    pub verification: VerificationConfig,
}

/// Pipeline-wide defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Retry tunables applied before per-stage overrides.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Partial retry policy; unset fields inherit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Delay after the first failure, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    /// Upper bound on any delay, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Growth factor per attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
}

impl RetryConfig {
    /// Applies the set fields on top of `base`.
    #[must_use]
    pub fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        let mut policy = base;
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = self.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(m) = self.backoff_multiplier {
            policy.backoff_multiplier = m;
        }
        policy
    }
}

/// One stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Unique stage name.
    pub name: String,
    /// Command argv; the first element is the program.
    pub command: Vec<String>,
    /// Extra environment for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Kill the command after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Failure classification.
    #[serde(default)]
    pub on_failure: FailureClass,
    /// Retry tunables.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Stages that must succeed first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Disabled stages are recorded as skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Readiness gates waited on before the command runs.
    #[serde(default)]
    pub wait_for: Vec<GateConfig>,
}

/// A readiness gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// The gated component.
    pub component: String,
    /// The check to poll.
    #[serde(flatten)]
    pub check: CheckConfig,
    /// Delay between checks; defaults to `probes.interval_ms`.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Maximum checks; defaults to `probes.max_attempts`.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// The kind of readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckConfig {
    /// TCP port accepts connections.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port.
        port: u16,
    },
    /// HTTP endpoint answers 2xx.
    Http {
        /// URL to request.
        url: String,
    },
    /// Command exits zero.
    Command {
        /// Command argv.
        argv: Vec<String>,
    },
}

/// Defaults for readiness gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeDefaults {
    /// Delay between checks in milliseconds.
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
    /// Maximum checks.
    #[serde(default = "default_probe_max_attempts")]
    pub max_attempts: u32,
    /// Per-check timeout for TCP and HTTP checks, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            interval_ms: default_probe_interval_ms(),
            max_attempts: default_probe_max_attempts(),
            timeout_ms: default_probe_timeout_ms(),
        }
    }
}

/// One component verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    /// Component name.
    pub component: String,
    /// Command argv.
    pub command: Vec<String>,
    /// Artifact path the command writes.
    pub report: PathBuf,
    /// Extra environment for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Kill the command after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Retry tunables.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Disabled verifiers are left out of the report.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Where status artifacts go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Output directory.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Keep only this many timestamped artifacts of each kind.
    #[serde(default)]
    pub keep_last: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            keep_last: None,
        }
    }
}

/// Verification behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationConfig {
    /// How many verifiers may run at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_probe_interval_ms() -> u64 {
    2_000
}

fn default_probe_max_attempts() -> u32 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("status")
}

fn default_max_parallel() -> usize {
    1
}
