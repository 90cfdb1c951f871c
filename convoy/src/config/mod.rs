//! Pipeline configuration.
//!
//! Pipelines are YAML files with `${VAR}` substitution. Parsing yields a
//! [`PipelineConfig`]; environment overrides are applied on top and the
//! result is built into a validated [`Plan`].

mod build;
mod overrides;
mod parser;
mod types;

pub use build::{load_plan, Plan};
pub use overrides::{apply_env_overrides, env_key, Env};
pub use parser::{parse_pipeline, parse_pipeline_str, substitute_env_vars};
pub use types::{
    CheckConfig, DefaultsConfig, GateConfig, OutputConfig, PipelineConfig, ProbeDefaults,
    RetryConfig, StageConfig, VerificationConfig, VerifierConfig,
};
