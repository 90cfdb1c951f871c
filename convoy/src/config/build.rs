//! Turns a parsed [`PipelineConfig`] into runnable pipeline objects.

use super::{
    apply_env_overrides, parse_pipeline, CheckConfig, Env, GateConfig, PipelineConfig,
    ProbeDefaults, StageConfig, VerifierConfig,
};
use crate::errors::{ConvoyError, ContractErrorInfo, PipelineValidationError, Result};
use crate::pipeline::{Pipeline, PipelineBuilder, ReadinessGate, RetryPolicy, Stage};
use crate::probe::{CommandProbe, Probe, TcpProbe};
use crate::runner::{CommandRunner, CommandSpec};
use crate::verification::{validate_verifiers, Verifier};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Everything a run needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The validated main pipeline.
    pub pipeline: Pipeline,
    /// Teardown stages, in declared order.
    pub teardown: Vec<Stage>,
    /// Enabled verifiers.
    pub verifiers: Vec<Verifier>,
    /// Status artifact directory.
    pub output_dir: PathBuf,
    /// Retention for timestamped artifacts.
    pub keep_last: Option<usize>,
    /// Verifier concurrency.
    pub max_parallel: usize,
}

impl Plan {
    /// Builds a plan from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration or validation error for anything that would
    /// make the pipeline unrunnable.
    pub fn from_config(config: &PipelineConfig, runner: &Arc<dyn CommandRunner>) -> Result<Self> {
        let defaults = config.defaults.retry.apply(RetryPolicy::default());

        let mut builder = PipelineBuilder::new(config.pipeline.clone());
        for stage in &config.stages {
            builder.add_stage(build_stage(stage, defaults, &config.probes, runner)?)?;
        }
        let pipeline = builder.build()?;

        let mut teardown_builder = PipelineBuilder::new(format!("{}:teardown", config.pipeline));
        for stage in &config.teardown {
            if !stage.depends_on.is_empty() {
                return Err(ConvoyError::Config(format!(
                    "teardown stage '{}' cannot declare depends_on",
                    stage.name
                )));
            }
            teardown_builder.add_stage(build_stage(stage, defaults, &config.probes, runner)?)?;
        }
        let teardown = teardown_builder.build()?.into_stages();

        let verifier_defaults = config.defaults.retry.apply(RetryPolicy::once());
        let verifiers = config
            .verifiers
            .iter()
            .filter(|v| {
                if !v.enabled {
                    debug!(component = %v.component, "Verifier disabled");
                }
                v.enabled
            })
            .map(|v| build_verifier(v, verifier_defaults))
            .collect::<Result<Vec<_>>>()?;
        validate_verifiers(&verifiers)?;

        if config.verification.max_parallel == 0 {
            return Err(PipelineValidationError::new("verification.max_parallel must be at least 1")
                .with_error_info(ContractErrorInfo::new(
                    "CONVOY-004-POLICY",
                    "max_parallel is zero",
                ))
                .into());
        }

        Ok(Self {
            pipeline,
            teardown,
            verifiers,
            output_dir: config.output.dir.clone(),
            keep_last: config.output.keep_last,
            max_parallel: config.verification.max_parallel,
        })
    }

    /// Renders the resolved plan for `convoy check`.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "pipeline {} ({} stage(s), digest {})",
            self.pipeline.name(),
            self.pipeline.len(),
            short_digest(self.pipeline.digest())
        );
        for stage in self.pipeline.stages() {
            describe_stage(&mut out, stage);
        }
        if !self.teardown.is_empty() {
            let _ = writeln!(out, "teardown:");
            for stage in &self.teardown {
                describe_stage(&mut out, stage);
            }
        }
        let _ = writeln!(out, "verifiers (max_parallel {}):", self.max_parallel);
        for verifier in &self.verifiers {
            let _ = writeln!(
                out,
                "  {} -> {} [{}] {}",
                verifier.component,
                verifier.report_path.display(),
                describe_policy(&verifier.retry_policy),
                verifier.command.display()
            );
        }
        let _ = write!(out, "output: {}", self.output_dir.display());
        if let Some(n) = self.keep_last {
            let _ = write!(out, " (keep last {n})");
        }
        out
    }
}

/// Parses, applies environment overrides and builds a plan.
///
/// # Errors
///
/// Returns the first configuration or validation error.
pub fn load_plan(path: &Path, env: &Env, runner: Arc<dyn CommandRunner>) -> Result<Plan> {
    let mut config = parse_pipeline(path, env)?;
    apply_env_overrides(&mut config, env)?;
    Plan::from_config(&config, &runner)
}

fn build_stage(
    config: &StageConfig,
    defaults: RetryPolicy,
    probes: &ProbeDefaults,
    runner: &Arc<dyn CommandRunner>,
) -> Result<Stage> {
    let action = command_spec(
        &config.name,
        &config.command,
        &config.env,
        config.cwd.as_deref(),
        config.timeout_secs,
    )?;
    let mut stage = Stage::new(config.name.clone(), action)
        .with_failure_class(config.on_failure)
        .with_retry_policy(config.retry.apply(defaults))
        .with_dependencies(config.depends_on.iter().cloned())
        .enabled(config.enabled);
    for gate in &config.wait_for {
        stage = stage.wait_for(build_gate(&config.name, gate, probes, runner)?);
    }
    Ok(stage)
}

fn build_gate(
    stage: &str,
    config: &GateConfig,
    defaults: &ProbeDefaults,
    runner: &Arc<dyn CommandRunner>,
) -> Result<ReadinessGate> {
    let timeout = Duration::from_millis(defaults.timeout_ms);
    let probe: Arc<dyn Probe> = match &config.check {
        CheckConfig::Tcp { host, port } => Arc::new(
            TcpProbe::new(config.component.clone(), host.clone(), *port)
                .with_connect_timeout(timeout),
        ),
        CheckConfig::Http { url } => http_probe(&config.component, url, timeout)?,
        CheckConfig::Command { argv } => {
            let owner = format!("{stage} gate '{}'", config.component);
            let spec = command_spec(&owner, argv, &BTreeMap::new(), None, None)?
                .with_timeout(timeout);
            Arc::new(CommandProbe::new(
                config.component.clone(),
                spec,
                Arc::clone(runner),
            ))
        }
    };
    Ok(ReadinessGate::new(
        probe,
        Duration::from_millis(config.interval_ms.unwrap_or(defaults.interval_ms)),
        config.max_attempts.unwrap_or(defaults.max_attempts),
    ))
}

#[cfg(feature = "http-probe")]
fn http_probe(component: &str, url: &str, timeout: Duration) -> Result<Arc<dyn Probe>> {
    Ok(Arc::new(crate::probe::HttpProbe::new(
        component, url, timeout,
    )?))
}

#[cfg(not(feature = "http-probe"))]
fn http_probe(component: &str, url: &str, _timeout: Duration) -> Result<Arc<dyn Probe>> {
    Err(ConvoyError::Config(format!(
        "gate '{component}' checks {url} but convoy was built without the http-probe feature"
    )))
}

fn build_verifier(config: &VerifierConfig, defaults: RetryPolicy) -> Result<Verifier> {
    let command = command_spec(
        &config.component,
        &config.command,
        &config.env,
        config.cwd.as_deref(),
        config.timeout_secs,
    )?;
    Ok(Verifier::new(config.component.clone(), command, config.report.clone())
        .with_retry_policy(config.retry.apply(defaults)))
}

fn command_spec(
    owner: &str,
    argv: &[String],
    env: &BTreeMap<String, String>,
    cwd: Option<&Path>,
    timeout_secs: Option<u64>,
) -> Result<CommandSpec> {
    if argv.first().map_or(true, |p| p.trim().is_empty()) {
        return Err(ConvoyError::Config(format!("'{owner}' has an empty command")));
    }
    let mut spec = CommandSpec::from_argv(argv.iter().cloned());
    for (key, value) in env {
        spec = spec.with_env(key.clone(), value.clone());
    }
    if let Some(cwd) = cwd {
        spec = spec.with_cwd(cwd);
    }
    if let Some(secs) = timeout_secs {
        spec = spec.with_timeout(Duration::from_secs(secs));
    }
    Ok(spec)
}

fn describe_stage(out: &mut String, stage: &Stage) {
    let _ = write!(
        out,
        "  {} [{}, {}]",
        stage.name,
        stage.on_failure,
        describe_policy(&stage.retry_policy)
    );
    if !stage.depends_on.is_empty() {
        let deps: Vec<&str> = stage.depends_on.iter().map(String::as_str).collect();
        let _ = write!(out, " after {}", deps.join(", "));
    }
    if !stage.enabled {
        let _ = write!(out, " (disabled)");
    }
    let _ = writeln!(out, ": {}", stage.action.display());
    for gate in &stage.gates {
        let _ = writeln!(
            out,
            "    wait for {} every {}ms, up to {} check(s)",
            gate.probe.component(),
            gate.interval.as_millis(),
            gate.max_attempts
        );
    }
}

fn describe_policy(policy: &RetryPolicy) -> String {
    format!(
        "{} attempt(s), {}ms x{} up to {}ms",
        policy.max_attempts,
        policy.initial_delay.as_millis(),
        policy.backoff_multiplier,
        policy.max_delay.as_millis()
    )
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_pipeline_str;
    use crate::core::FailureClass;
    use crate::testing::ScriptedRunner;

    const YAML: &str = r#"
pipeline: platform
defaults:
  retry:
    max_attempts: 2
    initial_delay_ms: 100
probes:
  interval_ms: 500
stages:
  - name: up
    command: ["docker", "compose", "up", "-d"]
    timeout_secs: 120
  - name: schema
    command: ["./apply-schema.sh"]
    depends_on: [up]
    env:
      CH_HOST: localhost
    wait_for:
      - component: clickhouse
        kind: tcp
        host: localhost
        port: 9000
      - component: kafka
        kind: command
        argv: ["kafka-topics", "--list"]
        max_attempts: 5
  - name: dashboards
    command: ["./provision.sh"]
    on_failure: recoverable
    retry:
      max_attempts: 6
teardown:
  - name: prune
    command: ["docker", "system", "prune", "-f"]
verifiers:
  - component: clickhouse
    command: ["./verify-clickhouse.sh"]
    report: out/clickhouse.json
  - component: superset
    command: ["./verify-superset.sh"]
    report: out/superset.json
    enabled: false
  - component: kafka
    command: ["./verify-kafka.sh"]
    report: out/kafka.json
    retry:
      max_attempts: 8
"#;

    fn runner() -> Arc<dyn CommandRunner> {
        Arc::new(ScriptedRunner::new())
    }

    fn plan(yaml: &str) -> Result<Plan> {
        let config = parse_pipeline_str(yaml, &Env::default())?;
        Plan::from_config(&config, &runner())
    }

    #[test]
    fn test_build_plan() {
        let plan = plan(YAML).unwrap();

        assert_eq!(plan.pipeline.len(), 3);
        let up = plan.pipeline.stage("up").unwrap();
        assert_eq!(up.retry_policy.max_attempts, 2);
        assert_eq!(up.retry_policy.initial_delay, Duration::from_millis(100));
        assert_eq!(up.action.timeout, Some(Duration::from_secs(120)));

        let schema = plan.pipeline.stage("schema").unwrap();
        assert_eq!(schema.gates.len(), 2);
        assert_eq!(schema.gates[0].interval, Duration::from_millis(500));
        assert_eq!(schema.gates[0].max_attempts, 30);
        assert_eq!(schema.gates[1].max_attempts, 5);
        assert_eq!(schema.gates[1].probe.component(), "kafka");
        assert_eq!(schema.action.env.get("CH_HOST").map(String::as_str), Some("localhost"));

        let dashboards = plan.pipeline.stage("dashboards").unwrap();
        assert_eq!(dashboards.on_failure, FailureClass::Recoverable);
        assert_eq!(dashboards.retry_policy.max_attempts, 6);

        assert_eq!(plan.teardown.len(), 1);
        assert_eq!(plan.max_parallel, 1);
    }

    #[test]
    fn test_disabled_verifiers_left_out() {
        let plan = plan(YAML).unwrap();
        let components: Vec<&str> = plan.verifiers.iter().map(|v| v.component.as_str()).collect();
        assert_eq!(components, ["clickhouse", "kafka"]);
        assert_eq!(plan.verifiers[0].retry_policy.max_attempts, 2);
        assert_eq!(plan.verifiers[1].retry_policy.max_attempts, 8);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let yaml = r#"
pipeline: p
stages:
  - name: a
    command: ["true"]
    depends_on: [b]
  - name: b
    command: ["true"]
"#;
        match plan(yaml).unwrap_err() {
            ConvoyError::Validation(e) => assert_eq!(e.code(), Some("CONVOY-002-FORWARD_REF")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_command_rejected() {
        let yaml = "pipeline: p\nstages:\n  - name: a\n    command: []\n";
        assert!(matches!(plan(yaml).unwrap_err(), ConvoyError::Config(_)));
    }

    #[test]
    fn test_teardown_dependencies_rejected() {
        let yaml = r#"
pipeline: p
teardown:
  - name: a
    command: ["true"]
  - name: b
    command: ["true"]
    depends_on: [a]
"#;
        let err = plan(yaml).unwrap_err().to_string();
        assert!(err.contains("teardown stage 'b'"), "{err}");
    }

    #[test]
    fn test_zero_max_parallel_rejected() {
        let yaml = "pipeline: p\nverification:\n  max_parallel: 0\n";
        assert!(matches!(plan(yaml).unwrap_err(), ConvoyError::Validation(_)));
    }

    #[test]
    fn test_describe_lists_everything() {
        let text = plan(YAML).unwrap().describe();
        assert!(text.starts_with("pipeline platform (3 stage(s)"));
        assert!(text.contains("schema [fatal"));
        assert!(text.contains("after up"));
        assert!(text.contains("wait for clickhouse every 500ms, up to 30 check(s)"));
        assert!(text.contains("teardown:"));
        assert!(text.contains("kafka -> out/kafka.json"));
        assert!(!text.contains("superset"));
    }

    #[test]
    fn test_load_plan_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, YAML).unwrap();
        let env = Env::from_pairs([
            ("CONVOY_STAGE_DASHBOARDS_ENABLED", "false"),
            ("CONVOY_VERIFIER_SUPERSET_ENABLED", "true"),
        ]);

        let plan = load_plan(&path, &env, runner()).unwrap();

        assert!(!plan.pipeline.stage("dashboards").unwrap().enabled);
        assert_eq!(plan.verifiers.len(), 3);
    }
}
