//! Resource cleanup registry.
//!
//! Every resource a build creates (VM, virtual disk, mount, temporary file,
//! share, account, attached ISO) is registered here immediately after it is
//! created, together with the action that tears it down. On failure or
//! cancellation the orchestrator runs [`CleanupRegistry::invoke_all`], which
//! unwinds in reverse registration order.
//!
//! Rules:
//! - each action is isolated: a failing or panicking action does not stop
//!   the ones after it
//! - a failed action stays registered so a later pass can retry it
//! - "already gone" is success
//! - `invoke_all` never returns an error; outcomes are reported instead

mod teardown;

pub use teardown::{remove_dir_idempotent, remove_dir_keeping, remove_file_idempotent};

use chrono::{DateTime, Utc};
use ffuforge_shared::errors::FfuResult;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Identifier of a registered action, unique per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(u64);

impl ActionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of resource an action tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupKind {
    Vm,
    VirtualDisk,
    MountedImage,
    TempFile,
    NetworkShare,
    UserAccount,
    Iso,
}

impl CleanupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupKind::Vm => "vm",
            CleanupKind::VirtualDisk => "virtual_disk",
            CleanupKind::MountedImage => "mounted_image",
            CleanupKind::TempFile => "temp_file",
            CleanupKind::NetworkShare => "network_share",
            CleanupKind::UserAccount => "user_account",
            CleanupKind::Iso => "iso",
        }
    }
}

impl fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared teardown closure; each call produces a fresh attempt.
pub type TeardownFn = Arc<dyn Fn() -> BoxFuture<'static, FfuResult<()>> + Send + Sync>;

/// A registered teardown.
#[derive(Clone)]
pub struct CleanupAction {
    pub id: ActionId,
    pub kind: CleanupKind,
    /// Human-readable resource name (VM name, path, share name).
    pub target: String,
    pub registered_at: DateTime<Utc>,
    teardown: TeardownFn,
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupAction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// Result of running one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CleanupResult {
    Removed,
    /// Teardown reported the resource no longer exists.
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub id: ActionId,
    pub kind: CleanupKind,
    pub target: String,
    pub result: CleanupResult,
}

impl CleanupOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.result, CleanupResult::Failed(_))
    }
}

/// Overall result of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CleanupSummary {
    Complete,
    /// Resources that could not be removed, as `kind target`.
    Partial { leftovers: Vec<String> },
}

impl CleanupSummary {
    pub fn from_outcomes(outcomes: &[CleanupOutcome]) -> Self {
        let leftovers: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| format!("{} {}", o.kind, o.target))
            .collect();
        if leftovers.is_empty() {
            CleanupSummary::Complete
        } else {
            CleanupSummary::Partial { leftovers }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CleanupSummary::Complete)
    }
}

/// Ordered set of pending teardowns for one build.
///
/// Owned by the orchestrator; not shared across threads.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    actions: Vec<CleanupAction>,
    next_id: u64,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown for a resource that now exists.
    pub fn register<F, Fut>(
        &mut self,
        kind: CleanupKind,
        target: impl Into<String>,
        teardown: F,
    ) -> ActionId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FfuResult<()>> + Send + 'static,
    {
        self.register_boxed(kind, target, Arc::new(move || teardown().boxed()))
    }

    pub fn register_boxed(
        &mut self,
        kind: CleanupKind,
        target: impl Into<String>,
        teardown: TeardownFn,
    ) -> ActionId {
        self.next_id += 1;
        let id = ActionId(self.next_id);
        let target = target.into();
        tracing::debug!(id = %id, kind = %kind, target = %target, "Registered cleanup action");
        self.actions.push(CleanupAction {
            id,
            kind,
            target,
            registered_at: Utc::now(),
            teardown,
        });
        id
    }

    /// Drop an action without running it (ownership moved elsewhere).
    ///
    /// Returns false if `id` was not registered.
    pub fn unregister(&mut self, id: ActionId) -> bool {
        match self.actions.iter().position(|a| a.id == id) {
            Some(pos) => {
                let action = self.actions.remove(pos);
                tracing::debug!(id = %id, kind = %action.kind, target = %action.target, "Unregistered cleanup action");
                true
            }
            None => false,
        }
    }

    /// Run one action now.
    ///
    /// On success the action is removed; on failure it stays registered.
    /// Returns `None` if `id` was not registered.
    pub async fn invoke(&mut self, id: ActionId) -> Option<CleanupOutcome> {
        let action = self.actions.iter().find(|a| a.id == id)?.clone();
        let outcome = run_action(&action).await;
        if outcome.is_success() {
            self.actions.retain(|a| a.id != id);
        }
        Some(outcome)
    }

    /// Run every pending action, most recently registered first.
    pub async fn invoke_all(&mut self, reason: &str) -> Vec<CleanupOutcome> {
        if self.actions.is_empty() {
            return Vec::new();
        }
        tracing::info!(pending = self.actions.len(), reason = %reason, "Running cleanup");

        let snapshot: Vec<CleanupAction> = self.actions.iter().rev().cloned().collect();
        let mut outcomes = Vec::with_capacity(snapshot.len());
        for action in &snapshot {
            let outcome = run_action(action).await;
            if outcome.is_success() {
                self.actions.retain(|a| a.id != action.id);
            }
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed > 0 {
            tracing::warn!(failed, remaining = self.actions.len(), "Cleanup left resources behind");
        } else {
            tracing::info!(removed = outcomes.len(), "Cleanup complete");
        }
        outcomes
    }

    /// Forget every action without running it (successful build).
    pub fn clear(&mut self) {
        if !self.actions.is_empty() {
            tracing::debug!(count = self.actions.len(), "Cleared cleanup registry");
        }
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Pending actions in registration order.
    pub fn pending(&self) -> &[CleanupAction] {
        &self.actions
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.actions.iter().any(|a| a.id == id)
    }
}

async fn run_action(action: &CleanupAction) -> CleanupOutcome {
    let attempt = AssertUnwindSafe((action.teardown)()).catch_unwind().await;
    let result = match attempt {
        Ok(Ok(())) => CleanupResult::Removed,
        Ok(Err(e)) if e.is_not_found() => CleanupResult::AlreadyGone,
        Ok(Err(e)) => CleanupResult::Failed(e.to_string()),
        Err(_) => CleanupResult::Failed("teardown panicked".to_string()),
    };

    match &result {
        CleanupResult::Removed => {
            tracing::info!(id = %action.id, kind = %action.kind, target = %action.target, "Removed")
        }
        CleanupResult::AlreadyGone => {
            tracing::debug!(id = %action.id, kind = %action.kind, target = %action.target, "Already gone")
        }
        CleanupResult::Failed(reason) => tracing::warn!(
            id = %action.id,
            kind = %action.kind,
            target = %action.target,
            "Cleanup failed: {}", reason
        ),
    }

    CleanupOutcome {
        id: action.id,
        kind: action.kind,
        target: action.target.clone(),
        result,
    }
}
