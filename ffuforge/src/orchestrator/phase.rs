//! Build phases and their progress weights.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the fixed build sequence.
///
/// ```text
/// Validate → AcquireResources → PrepareDisk → CreateVm → RunGuestWorkload
///          → Capture → InjectPostCaptureContent → Package → Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Validate,
    AcquireResources,
    PrepareDisk,
    CreateVm,
    RunGuestWorkload,
    Capture,
    InjectPostCaptureContent,
    Package,
    Done,
}

impl BuildPhase {
    pub const ALL: [BuildPhase; 9] = [
        BuildPhase::Validate,
        BuildPhase::AcquireResources,
        BuildPhase::PrepareDisk,
        BuildPhase::CreateVm,
        BuildPhase::RunGuestWorkload,
        BuildPhase::Capture,
        BuildPhase::InjectPostCaptureContent,
        BuildPhase::Package,
        BuildPhase::Done,
    ];

    /// Share of total progress this phase accounts for. Sums to 100.
    pub fn weight(&self) -> u8 {
        match self {
            BuildPhase::Validate => 2,
            BuildPhase::AcquireResources => 10,
            BuildPhase::PrepareDisk => 25,
            BuildPhase::CreateVm => 3,
            BuildPhase::RunGuestWorkload => 20,
            BuildPhase::Capture => 25,
            BuildPhase::InjectPostCaptureContent => 5,
            BuildPhase::Package => 10,
            BuildPhase::Done => 0,
        }
    }

    /// Percent complete when this phase begins.
    pub fn start_percent(&self) -> u8 {
        BuildPhase::ALL
            .iter()
            .take_while(|p| *p != self)
            .map(|p| p.weight())
            .sum()
    }

    pub fn next(&self) -> Option<BuildPhase> {
        let pos = BuildPhase::ALL.iter().position(|p| p == self)?;
        BuildPhase::ALL.get(pos + 1).copied()
    }

    /// Human-readable label used in progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            BuildPhase::Validate => "Validating configuration",
            BuildPhase::AcquireResources => "Acquiring drivers and updates",
            BuildPhase::PrepareDisk => "Preparing build disk",
            BuildPhase::CreateVm => "Creating build VM",
            BuildPhase::RunGuestWorkload => "Running guest workload",
            BuildPhase::Capture => "Capturing FFU",
            BuildPhase::InjectPostCaptureContent => "Injecting post-capture content",
            BuildPhase::Package => "Packaging",
            BuildPhase::Done => "Done",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Validate => "validate",
            BuildPhase::AcquireResources => "acquire_resources",
            BuildPhase::PrepareDisk => "prepare_disk",
            BuildPhase::CreateVm => "create_vm",
            BuildPhase::RunGuestWorkload => "run_guest_workload",
            BuildPhase::Capture => "capture",
            BuildPhase::InjectPostCaptureContent => "inject_post_capture_content",
            BuildPhase::Package => "package",
            BuildPhase::Done => "done",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
