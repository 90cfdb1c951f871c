//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage definitions with failure classification and readiness gates
//! - Pipeline builder with validation
//! - The retry/backoff executor
//! - The stage sequencer and run state machine

mod builder;
mod executor;
mod retry;
mod sequencer;
mod stage;


pub use builder::{Pipeline, PipelineBuilder};
pub use executor::{AttemptRecord, GateRecord, RetryExecutor, StageOutcome};
pub use retry::RetryPolicy;
pub use sequencer::{compute_run_state, RunReport, Sequencer, DISABLED_REASON};
pub use stage::{ReadinessGate, Stage};
