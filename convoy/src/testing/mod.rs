//! Testing utilities for convoy pipelines.
//!
//! This module provides:
//! - A virtual clock so retry and readiness timing runs without real sleeps
//! - A scripted command runner
//! - Scripted probes

mod clock;
mod probes;
mod runner;

pub use clock::ManualClock;
pub use probes::ScriptedProbe;
pub use runner::ScriptedRunner;
