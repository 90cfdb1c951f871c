//! Programmable command runner.

use crate::errors::CommandError;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

type Responder = Arc<dyn Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync>;

/// A [`CommandRunner`] that replays scripted responses.
///
/// Responses are keyed by the full command line (`CommandSpec::display`) or,
/// failing that, by the program name. Queued responses are consumed in order;
/// once a queue is empty the key's fallback applies, and without a fallback
/// the command succeeds with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    queued: Mutex<HashMap<String, VecDeque<Responder>>>,
    fallback: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// Creates an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one output for `key`.
    pub fn push(&self, key: impl Into<String>, output: CommandOutput) {
        self.push_with(key, move |_| Ok(output.clone()));
    }

    /// Queues one spawn error for `key`.
    pub fn push_error(&self, key: impl Into<String>, error: CommandError) {
        self.push_with(key, move |_| Err(error.clone()));
    }

    /// Queues a closure invoked with the command being run.
    pub fn push_with<F>(&self, key: impl Into<String>, respond: F)
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        self.queued
            .lock()
            .entry(key.into())
            .or_default()
            .push_back(Arc::new(respond));
    }

    /// Sets the response used once the queue for `key` is drained.
    pub fn always(&self, key: impl Into<String>, output: CommandOutput) {
        self.always_with(key, move |_| Ok(output.clone()));
    }

    /// Sets a closure used once the queue for `key` is drained.
    pub fn always_with<F>(&self, key: impl Into<String>, respond: F)
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
    {
        self.fallback.lock().insert(key.into(), Arc::new(respond));
    }

    /// Every command run so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Number of runs whose command line or program equals `key`.
    #[must_use]
    pub fn call_count(&self, key: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|spec| spec.display() == key || spec.program == key)
            .count()
    }

    fn responder(&self, spec: &CommandSpec) -> Option<Responder> {
        let keys = [spec.display(), spec.program.clone()];
        let mut queued = self.queued.lock();
        for key in &keys {
            if let Some(next) = queued.get_mut(key).and_then(VecDeque::pop_front) {
                return Some(next);
            }
        }
        drop(queued);
        let fallback = self.fallback.lock();
        keys.iter().find_map(|key| fallback.get(key).cloned())
    }
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().push(spec.clone());
        match self.responder(spec) {
            Some(respond) => respond(spec),
            None => Ok(CommandOutput::success("")),
        }
    }
}
