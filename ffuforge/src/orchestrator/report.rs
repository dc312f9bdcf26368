//! Terminal report of one orchestrator run.

use super::BuildPhase;
use crate::channel::BuildState;
use crate::cleanup::{CleanupOutcome, CleanupSummary};
use std::path::PathBuf;

/// What happened to a build, returned by [`super::BuildOrchestrator::run`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub state: BuildState,
    /// Phase that failed or observed cancellation.
    pub failed_phase: Option<BuildPhase>,
    pub error: Option<String>,
    /// Error category (see `FfuError::kind_name`).
    pub error_kind: Option<&'static str>,
    /// Outcomes of the final cleanup sweep, empty when none ran.
    pub cleanup: Vec<CleanupOutcome>,
    /// `"kind target"` of actions still registered after the sweep.
    pub pending_cleanup: Vec<String>,
    pub ffu_path: Option<PathBuf>,
}

impl BuildReport {
    pub(crate) fn new(state: BuildState) -> Self {
        Self {
            state,
            failed_phase: None,
            error: None,
            error_kind: None,
            cleanup: Vec::new(),
            pending_cleanup: Vec::new(),
            ffu_path: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == BuildState::Completed
    }

    /// `None` when no sweep ran.
    pub fn cleanup_summary(&self) -> Option<CleanupSummary> {
        if self.cleanup.is_empty() && self.pending_cleanup.is_empty() {
            return None;
        }
        if self.pending_cleanup.is_empty() {
            Some(CleanupSummary::from_outcomes(&self.cleanup))
        } else {
            Some(CleanupSummary::Partial {
                leftovers: self.pending_cleanup.clone(),
            })
        }
    }
}
