//! # Convoy
//!
//! A deployment and verification pipeline coordinator for multi-service data
//! platforms.
//!
//! Convoy brings up a graph of interdependent external services in declared
//! order and produces one consolidated status report:
//!
//! - **Stages**: opaque external commands with a fatal or recoverable failure
//!   class, optional readiness gates and their own retry policy
//! - **Readiness probing**: TCP, HTTP and command checks polled on an
//!   injectable clock
//! - **Verification**: independent per-component verifiers whose artifacts are
//!   merged into a [`core::ConsolidatedReport`]
//! - **Status recording**: timestamped artifacts plus an atomically replaced
//!   `latest` alias
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use convoy::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("platform")
//!     .stage(Stage::new("up", CommandSpec::from_argv(["docker", "compose", "up", "-d"])))?
//!     .stage(
//!         Stage::new("schema", CommandSpec::from_argv(["./apply-schema.sh"]))
//!             .depends_on("up")
//!             .recoverable(),
//!     )?
//!     .build()?;
//!
//! let executor = RetryExecutor::new(runner, clock, events, cancel);
//! let report = Sequencer::new(executor).run(&pipeline).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod clock;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod probe;
pub mod recorder;
pub mod runner;
pub mod testing;
pub mod verification;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{load_plan, Env, Plan};
    pub use crate::core::{
        ConsolidatedReport, FailureClass, OutcomeKind, ProbeResult, ProbeStatus, ReportSummary,
        RunState,
    };
    pub use crate::errors::{
        CommandError, ContractErrorInfo, ConvoyError, FailureKind, PipelineValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        Pipeline, PipelineBuilder, ReadinessGate, RetryExecutor, RetryPolicy, RunReport,
        Sequencer, Stage, StageOutcome,
    };
    pub use crate::probe::{Probe, ProbeOutcome, ReadinessProber};
    pub use crate::recorder::StatusRecorder;
    pub use crate::runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
    pub use crate::verification::{Aggregator, Verifier};
}
