//! Consolidated verification report.

use super::{ProbeResult, ProbeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts over the components of a [`ConsolidatedReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Number of components.
    pub total: usize,
    /// Components reporting `ok`.
    pub success_count: usize,
    /// Components reporting `error`.
    pub failed_count: usize,
    /// Components reporting `warning`.
    #[serde(default)]
    pub warning_count: usize,
    /// Components reporting `skipped`.
    #[serde(default)]
    pub skipped_count: usize,
    /// True only when at least one component exists and all of them are `ok`.
    pub all_passed: bool,
}

impl ReportSummary {
    /// Computes the summary over a set of results.
    #[must_use]
    pub fn compute<'a>(results: impl IntoIterator<Item = &'a ProbeResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            match result.status {
                ProbeStatus::Ok => summary.success_count += 1,
                ProbeStatus::Error => summary.failed_count += 1,
                ProbeStatus::Warning => summary.warning_count += 1,
                ProbeStatus::Skipped => summary.skipped_count += 1,
            }
        }
        summary.all_passed = summary.total > 0
            && summary.failed_count == 0
            && summary.success_count == summary.total;
        summary
    }
}

/// The merged, run-level status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    /// When the aggregation ran.
    pub timestamp: DateTime<Utc>,
    /// Per-component results, keyed by component name.
    pub components: BTreeMap<String, ProbeResult>,
    /// Counts derived from `components`.
    pub summary: ReportSummary,
}

impl ConsolidatedReport {
    /// Builds a report and computes its summary.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, components: BTreeMap<String, ProbeResult>) -> Self {
        let summary = ReportSummary::compute(components.values());
        Self {
            timestamp,
            components,
            summary,
        }
    }

    /// Builds a report from results, keyed by each result's component name.
    ///
    /// A later result for the same component replaces an earlier one.
    #[must_use]
    pub fn from_results(
        timestamp: DateTime<Utc>,
        results: impl IntoIterator<Item = ProbeResult>,
    ) -> Self {
        let components = results
            .into_iter()
            .map(|result| (result.component.clone(), result))
            .collect();
        Self::new(timestamp, components)
    }

    /// Returns true if every component passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.summary.all_passed
    }

    /// Returns the result for a component.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ProbeResult> {
        self.components.get(name)
    }

    /// Names of components reporting `error`.
    #[must_use]
    pub fn failed_components(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter(|(_, result)| result.status.is_error())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
