//! Scripted probes.

use crate::probe::Probe;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    ReadyAfter(u32),
    Never,
    Panics,
}

/// A probe that fails a fixed number of times before reporting ready.
#[derive(Debug)]
pub struct ScriptedProbe {
    component: String,
    behavior: Behavior,
    calls: AtomicU32,
}

impl ScriptedProbe {
    /// Fails `failures` checks, then succeeds.
    #[must_use]
    pub fn ready_after(component: impl Into<String>, failures: u32) -> Self {
        Self::with_behavior(component, Behavior::ReadyAfter(failures))
    }

    /// Never succeeds.
    #[must_use]
    pub fn never_ready(component: impl Into<String>) -> Self {
        Self::with_behavior(component, Behavior::Never)
    }

    /// Panics on every check.
    #[must_use]
    pub fn panics(component: impl Into<String>) -> Self {
        Self::with_behavior(component, Behavior::Panics)
    }

    fn with_behavior(component: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            component: component.into(),
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of checks performed.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn component(&self) -> &str {
        &self.component
    }

    async fn check(&self) -> Result<(), String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behavior {
            Behavior::ReadyAfter(failures) if call > failures => Ok(()),
            Behavior::ReadyAfter(_) | Behavior::Never => {
                Err(format!("{} not ready", self.component))
            }
            Behavior::Panics => panic!("{} probe exploded", self.component),
        }
    }
}
