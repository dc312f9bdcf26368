//! Test doubles shared by the ffuforge integration tests.
//!
//! [`FakeProvider`] and [`FakeSteps`] record every call in a shared
//! [`Journal`] so tests can assert on ordering across both, and accept
//! per-operation faults, hooks and stalls through [`Behaviour`].

mod fixtures;
mod provider;
mod runner;
mod steps;

pub use fixtures::{direct_config, install_config};
pub use provider::FakeProvider;
pub use runner::ScriptedRunner;
pub use steps::FakeSteps;

use ffuforge_shared::errors::{FfuError, FfuResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Ordered record of calls made to the fakes.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Operation names only (first word of each entry).
    pub fn ops(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .map(|e| e.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn called(&self, op: &str) -> bool {
        self.ops().iter().any(|o| o == op)
    }

    /// Index of the first call to `op`.
    pub fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| *o == op).count()
    }
}

pub type Fault = Arc<dyn Fn() -> FfuError + Send + Sync>;
pub type Hook = Arc<dyn Fn() + Send + Sync>;

/// Per-operation behaviour overrides.
#[derive(Clone, Default)]
pub struct Behaviour {
    faults: Arc<Mutex<HashMap<String, Fault>>>,
    hooks: Arc<Mutex<HashMap<String, Hook>>>,
    stalls: Arc<Mutex<HashSet<String>>>,
}

impl Behaviour {
    pub fn fail_on(&self, op: &str, fault: impl Fn() -> FfuError + Send + Sync + 'static) {
        self.faults.lock().insert(op.to_string(), Arc::new(fault));
    }

    /// Run `hook` every time `op` is called, before it completes.
    pub fn on_call(&self, op: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().insert(op.to_string(), Arc::new(hook));
    }

    /// Make `op` never return.
    pub fn stall_on(&self, op: &str) {
        self.stalls.lock().insert(op.to_string());
    }

    /// Apply hooks, stalls and faults registered for `op`.
    pub async fn enter(&self, op: &str) -> FfuResult<()> {
        let hook = self.hooks.lock().get(op).cloned();
        if let Some(hook) = hook {
            hook();
        }
        let stalled = self.stalls.lock().contains(op);
        if stalled {
            std::future::pending::<()>().await;
        }
        let fault = self.faults.lock().get(op).cloned();
        match fault {
            Some(fault) => Err(fault()),
            None => Ok(()),
        }
    }
}
