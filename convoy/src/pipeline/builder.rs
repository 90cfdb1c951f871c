//! Pipeline builder with validation.

use super::Stage;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A validated, immutable, ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
    digest: String,
}

impl Pipeline {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in declared order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// SHA-256 (hex) of the pipeline name and ordered stage names.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Consumes the pipeline, returning its stages.
    #[must_use]
    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }
}

/// Builder for creating validated pipelines.
///
/// Stages are validated as they are added: names must be unique and every
/// dependency must name a stage that was added earlier.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Stage>,
    names: HashSet<String>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Adds a stage, consuming and returning the builder.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn stage(mut self, stage: Stage) -> Result<Self, PipelineValidationError> {
        self.add_stage(stage)?;
        Ok(self)
    }

    /// Adds a stage.
    ///
    /// # Errors
    ///
    /// Returns an error for a duplicate name, a forward or unknown
    /// dependency, or anything [`Stage::validate`] rejects.
    pub fn add_stage(&mut self, stage: Stage) -> Result<(), PipelineValidationError> {
        stage.validate()?;

        if self.names.contains(&stage.name) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage name '{}'",
                stage.name
            ))
            .with_stages(vec![stage.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONVOY-001-DUPLICATE",
                    format!("Stage '{}' is declared more than once", stage.name),
                )
                .with_fix_hint("Give every stage a unique name."),
            ));
        }

        for dep in &stage.depends_on {
            if !self.names.contains(dep) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' depends on '{}', which is not declared before it",
                    stage.name, dep
                ))
                .with_stages(vec![stage.name.clone(), dep.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "CONVOY-002-FORWARD_REF",
                        format!("Dependency '{dep}' not found among earlier stages"),
                    )
                    .with_fix_hint(
                        "Declare the dependency before the stage that depends on it.",
                    ),
                ));
            }
        }

        self.names.insert(stage.name.clone());
        self.stages.push(stage);
        Ok(())
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline name is empty.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Pipeline name cannot be empty"));
        }
        let digest = digest_of(&self.name, &self.stages);
        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            digest,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

fn digest_of(name: &str, stages: &[Stage]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    for stage in stages {
        hasher.update(b"\n");
        hasher.update(stage.name.as_bytes());
    }
    hex::encode(hasher.finalize())
}
