//! Pipeline YAML parsing with environment variable substitution.

use super::{Env, PipelineConfig};
use crate::errors::{ConvoyError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}"));

/// Substitutes `${VAR_NAME}` patterns with values from `env`.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str, env: &Env) -> Result<String> {
    let re = ENV_VAR_RE
        .as_ref()
        .map_err(|e| ConvoyError::Config(format!("invalid substitution pattern: {e}")))?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        env.get(name).map_or_else(
            || {
                missing.push(name.to_string());
                String::new()
            },
            str::to_string,
        )
    });

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(ConvoyError::Config(format!(
            "Missing environment variable(s): {}",
            missing.join(", ")
        )));
    }
    Ok(result.into_owned())
}

/// Parses a pipeline YAML string (after substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML is invalid.
pub fn parse_pipeline_str(yaml: &str, env: &Env) -> Result<PipelineConfig> {
    let substituted = substitute_env_vars(yaml, env)?;
    serde_yaml::from_str(&substituted)
        .map_err(|e| ConvoyError::Config(format!("Failed to parse pipeline YAML: {e}")))
}

/// Parses a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path, env: &Env) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConvoyError::Config(format!(
            "Failed to read pipeline file {}: {e}",
            path.display()
        ))
    })?;
    parse_pipeline_str(&content, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use crate::core::FailureClass;

    fn env(pairs: &[(&str, &str)]) -> Env {
        Env::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_env_var_substitution() {
        let input = "host: ${CH_HOST}\nport: 8123";
        let result = substitute_env_vars(input, &env(&[("CH_HOST", "clickhouse")])).unwrap();
        assert_eq!(result, "host: clickhouse\nport: 8123");
    }

    #[test]
    fn test_repeated_and_multiple_vars() {
        let vars = env(&[("A", "alpha"), ("B", "beta")]);
        let result = substitute_env_vars("${A}-${B}-${A}", &vars).unwrap();
        assert_eq!(result, "alpha-beta-alpha");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = "plain: $HOME and $ {NOT_A_VAR}";
        assert_eq!(substitute_env_vars(input, &Env::default()).unwrap(), input);
    }

    #[test]
    fn test_missing_vars_all_reported() {
        let err = substitute_env_vars("${MISSING_X} ${MISSING_Y} ${MISSING_X}", &Env::default())
            .unwrap_err()
            .to_string();
        assert!(err.contains("MISSING_X, MISSING_Y"));
    }

    #[test]
    fn test_parse_pipeline_from_string() {
        let yaml = r#"
pipeline: platform
defaults:
  retry:
    max_attempts: 4
stages:
  - name: up
    command: ["docker", "compose", "up", "-d"]
  - name: schema
    command: ["./apply-schema.sh"]
    depends_on: [up]
    wait_for:
      - component: clickhouse
        kind: tcp
        host: ${CH_HOST}
        port: 9000
      - component: grafana
        kind: http
        url: http://localhost:3000/api/health
        max_attempts: 10
  - name: dashboards
    command: ["./provision.sh"]
    on_failure: recoverable
    retry:
      initial_delay_ms: 500
verifiers:
  - component: kafka
    command: ["./verify-kafka.sh"]
    report: out/kafka.json
output:
  keep_last: 10
"#;
        let config = parse_pipeline_str(yaml, &env(&[("CH_HOST", "localhost")])).unwrap();

        assert_eq!(config.pipeline, "platform");
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.defaults.retry.max_attempts, Some(4));
        assert_eq!(config.stages[2].on_failure, FailureClass::Recoverable);
        assert_eq!(
            config.stages[1].wait_for[0].check,
            CheckConfig::Tcp {
                host: "localhost".into(),
                port: 9000
            }
        );
        assert_eq!(config.stages[1].wait_for[1].max_attempts, Some(10));
        assert!(config.stages[0].enabled);
        assert_eq!(config.verifiers[0].component, "kafka");
        assert_eq!(config.output.keep_last, Some(10));
        assert_eq!(config.verification.max_parallel, 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "pipeline: p\nstages:\n  - name: a\n    command: [\"true\"]\n    retries: 3\n";
        assert!(parse_pipeline_str(yaml, &Env::default()).is_err());
    }

    #[test]
    fn test_parse_missing_file() {
        let err = parse_pipeline(Path::new("/definitely/not/here.yaml"), &Env::default())
            .unwrap_err();
        assert!(matches!(err, ConvoyError::Config(_)));
    }
}
