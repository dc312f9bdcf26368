//! What the controller reports once a build is over.

use crate::channel::BuildState;
use crate::cleanup::CleanupSummary;
use crate::orchestrator::{BuildPhase, BuildReport};
use std::fmt;
use std::path::PathBuf;

/// Whether the build's resources were removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStatus {
    Complete,
    /// `"kind target"` of every resource left behind.
    Partial(Vec<String>),
    /// The worker died before it could clean up.
    NotRun,
}

#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub state: BuildState,
    pub failed_phase: Option<BuildPhase>,
    /// Latest Error-level message, else the orchestrator's error.
    pub last_error: Option<String>,
    pub cleanup: CleanupStatus,
    pub ffu_path: Option<PathBuf>,
}

impl BuildSummary {
    pub(crate) fn from_report(report: BuildReport, last_error: Option<String>) -> Self {
        let cleanup = match report.cleanup_summary() {
            None | Some(CleanupSummary::Complete) => CleanupStatus::Complete,
            Some(CleanupSummary::Partial { leftovers }) => CleanupStatus::Partial(leftovers),
        };
        Self {
            state: report.state,
            failed_phase: report.failed_phase,
            last_error: last_error.or(report.error),
            cleanup,
            ffu_path: report.ffu_path,
        }
    }

    /// Worker ended without a report (aborted or panicked).
    pub(crate) fn crashed(reason: impl Into<String>, last_error: Option<String>) -> Self {
        Self {
            state: BuildState::Failed,
            failed_phase: None,
            last_error: last_error.or_else(|| Some(reason.into())),
            cleanup: CleanupStatus::NotRun,
            ffu_path: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == BuildState::Completed
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.state, &self.ffu_path) {
            (BuildState::Completed, Some(path)) => write!(f, "Build completed: {}", path.display())?,
            (state, _) => {
                write!(f, "Build {state}")?;
                if let Some(phase) = self.failed_phase {
                    write!(f, " at {}", phase)?;
                }
                if let Some(error) = &self.last_error {
                    write!(f, ": {error}")?;
                }
            }
        }
        match &self.cleanup {
            CleanupStatus::Complete => Ok(()),
            CleanupStatus::Partial(leftovers) => {
                write!(f, "\nCleanup incomplete; remove manually:")?;
                for leftover in leftovers {
                    write!(f, "\n  - {leftover}")?;
                }
                Ok(())
            }
            CleanupStatus::NotRun => write!(
                f,
                "\nCleanup did not run; check for a leftover VM, disk, share or account"
            ),
        }
    }
}
