//! Environment-variable overrides.
//!
//! Per-stage toggles and retry tunables can be changed without editing the
//! pipeline file:
//!
//! - `CONVOY_STAGE_<NAME>_ENABLED`, `CONVOY_VERIFIER_<NAME>_ENABLED`
//! - `CONVOY_{STAGE,VERIFIER}_<NAME>_{MAX_ATTEMPTS,INITIAL_DELAY_MS,MAX_DELAY_MS,BACKOFF_MULTIPLIER}`
//! - `CONVOY_DEFAULT_{MAX_ATTEMPTS,INITIAL_DELAY_MS,MAX_DELAY_MS,BACKOFF_MULTIPLIER}`
//! - `CONVOY_OUTPUT_DIR`, `CONVOY_OUTPUT_KEEP_LAST`, `CONVOY_VERIFICATION_MAX_PARALLEL`
//!
//! `<NAME>` is the stage or component name upper-cased, with every
//! character outside `[A-Z0-9]` replaced by `_`.

use super::{PipelineConfig, RetryConfig};
use crate::errors::{ConvoyError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// A snapshot of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    /// Captures the current process environment (non-UTF-8 entries are
    /// ignored).
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    /// Builds a snapshot from explicit pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns a variable's value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                ConvoyError::Config(format!("{key}: invalid value '{raw}'"))
            }),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse_bool(raw)
                .map(Some)
                .ok_or_else(|| ConvoyError::Config(format!("{key}: invalid boolean '{raw}'"))),
        }
    }
}

/// Upper-cases a name and maps every character outside `[A-Z0-9]` to `_`.
#[must_use]
pub fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Applies every override found in `env` to `config`.
///
/// # Errors
///
/// Returns [`ConvoyError::Config`] for a malformed override value.
pub fn apply_env_overrides(config: &mut PipelineConfig, env: &Env) -> Result<()> {
    apply_retry(&mut config.defaults.retry, env, "CONVOY_DEFAULT")?;

    for stage in config.stages.iter_mut().chain(config.teardown.iter_mut()) {
        let prefix = format!("CONVOY_STAGE_{}", env_key(&stage.name));
        if let Some(enabled) = env.flag(&format!("{prefix}_ENABLED"))? {
            debug!(stage = %stage.name, enabled, "Stage toggle overridden");
            stage.enabled = enabled;
        }
        apply_retry(&mut stage.retry, env, &prefix)?;
    }

    for verifier in &mut config.verifiers {
        let prefix = format!("CONVOY_VERIFIER_{}", env_key(&verifier.component));
        if let Some(enabled) = env.flag(&format!("{prefix}_ENABLED"))? {
            debug!(component = %verifier.component, enabled, "Verifier toggle overridden");
            verifier.enabled = enabled;
        }
        apply_retry(&mut verifier.retry, env, &prefix)?;
    }

    if let Some(dir) = env.get("CONVOY_OUTPUT_DIR") {
        config.output.dir = PathBuf::from(dir);
    }
    if let Some(keep) = env.parsed("CONVOY_OUTPUT_KEEP_LAST")? {
        config.output.keep_last = Some(keep);
    }
    if let Some(max) = env.parsed("CONVOY_VERIFICATION_MAX_PARALLEL")? {
        config.verification.max_parallel = max;
    }
    Ok(())
}

fn apply_retry(retry: &mut RetryConfig, env: &Env, prefix: &str) -> Result<()> {
    if let Some(v) = env.parsed(&format!("{prefix}_MAX_ATTEMPTS"))? {
        retry.max_attempts = Some(v);
    }
    if let Some(v) = env.parsed(&format!("{prefix}_INITIAL_DELAY_MS"))? {
        retry.initial_delay_ms = Some(v);
    }
    if let Some(v) = env.parsed(&format!("{prefix}_MAX_DELAY_MS"))? {
        retry.max_delay_ms = Some(v);
    }
    if let Some(v) = env.parsed(&format!("{prefix}_BACKOFF_MULTIPLIER"))? {
        retry.backoff_multiplier = Some(v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_pipeline_str;

    const YAML: &str = r#"
pipeline: platform
stages:
  - name: kafka-topics
    command: ["./topics.sh"]
    on_failure: recoverable
  - name: seed
    command: ["./seed.sh"]
teardown:
  - name: down
    command: ["docker", "compose", "down"]
verifiers:
  - component: clickhouse
    command: ["./verify.sh"]
    report: out/clickhouse.json
"#;

    fn config() -> PipelineConfig {
        parse_pipeline_str(YAML, &Env::default()).unwrap()
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("kafka-topics"), "KAFKA_TOPICS");
        assert_eq!(env_key("load.v2"), "LOAD_V2");
    }

    #[test]
    fn test_stage_overrides() {
        let mut config = config();
        let env = Env::from_pairs([
            ("CONVOY_STAGE_KAFKA_TOPICS_MAX_ATTEMPTS", "7"),
            ("CONVOY_STAGE_KAFKA_TOPICS_INITIAL_DELAY_MS", "250"),
            ("CONVOY_STAGE_SEED_ENABLED", "off"),
            ("CONVOY_STAGE_DOWN_ENABLED", "no"),
        ]);

        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.stages[0].retry.max_attempts, Some(7));
        assert_eq!(config.stages[0].retry.initial_delay_ms, Some(250));
        assert!(!config.stages[1].enabled);
        assert!(!config.teardown[0].enabled);
    }

    #[test]
    fn test_defaults_verifier_and_output_overrides() {
        let mut config = config();
        let env = Env::from_pairs([
            ("CONVOY_DEFAULT_BACKOFF_MULTIPLIER", "1.5"),
            ("CONVOY_VERIFIER_CLICKHOUSE_ENABLED", "false"),
            ("CONVOY_VERIFIER_CLICKHOUSE_MAX_ATTEMPTS", "10"),
            ("CONVOY_OUTPUT_DIR", "/var/lib/convoy"),
            ("CONVOY_OUTPUT_KEEP_LAST", "3"),
            ("CONVOY_VERIFICATION_MAX_PARALLEL", "4"),
        ]);

        apply_env_overrides(&mut config, &env).unwrap();

        assert_eq!(config.defaults.retry.backoff_multiplier, Some(1.5));
        assert!(!config.verifiers[0].enabled);
        assert_eq!(config.verifiers[0].retry.max_attempts, Some(10));
        assert_eq!(config.output.dir, PathBuf::from("/var/lib/convoy"));
        assert_eq!(config.output.keep_last, Some(3));
        assert_eq!(config.verification.max_parallel, 4);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        for (key, value) in [
            ("CONVOY_STAGE_SEED_MAX_ATTEMPTS", "three"),
            ("CONVOY_STAGE_SEED_ENABLED", "maybe"),
            ("CONVOY_DEFAULT_INITIAL_DELAY_MS", "-5"),
            ("CONVOY_VERIFICATION_MAX_PARALLEL", ""),
        ] {
            let mut config = config();
            let err = apply_env_overrides(&mut config, &Env::from_pairs([(key, value)]))
                .unwrap_err()
                .to_string();
            assert!(err.contains(key), "{err}");
        }
    }

    #[test]
    fn test_unrelated_vars_ignored() {
        let mut config = config();
        let before = config.clone();
        apply_env_overrides(&mut config, &Env::from_pairs([("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config, before);
    }
}
