//! Work the orchestrator delegates to external collaborators.

use crate::config::BuildConfig;
use crate::provider::MountHandle;
use async_trait::async_trait;
use ffuforge_shared::errors::FfuResult;
use std::fmt;
use std::path::{Path, PathBuf};

/// Result of a step that may legitimately have nothing to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// Step did not run; the reason is reported to the controller.
    Skipped(String),
}

/// Temporary local account the capture environment logs in with.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureUser {
    pub name: String,
    pub password: String,
}

impl fmt::Debug for CaptureUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureUser")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Temporary SMB share the guest writes its captured image to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureShare {
    pub name: String,
    /// Host directory behind the share.
    pub path: PathBuf,
    /// `\\host\name` as seen from the guest.
    pub unc: String,
}

/// Phase bodies the orchestrator does not implement itself.
///
/// Each call runs to completion or fails; none is interrupted by
/// cancellation. Implementations own their retry policies.
#[async_trait]
pub trait BuildSteps: Send + Sync {
    /// Fetch drivers and updates the build needs.
    async fn acquire_resources(&self, config: &BuildConfig) -> FfuResult<StepOutcome>;

    /// Lay the base image onto the mounted build disk and make it bootable.
    async fn apply_base_image(&self, config: &BuildConfig, disk: &MountHandle) -> FfuResult<()>;

    async fn create_capture_user(&self, config: &BuildConfig) -> FfuResult<CaptureUser>;

    async fn create_capture_share(
        &self,
        config: &BuildConfig,
        user: &CaptureUser,
    ) -> FfuResult<CaptureShare>;

    /// Must report `NotFound` when the share no longer exists.
    async fn remove_capture_share(&self, share: &CaptureShare) -> FfuResult<()>;

    /// Must report `NotFound` when the account no longer exists.
    async fn remove_capture_user(&self, user: &CaptureUser) -> FfuResult<()>;

    /// Move the image the guest wrote to `share` into `output`.
    async fn collect_guest_capture(
        &self,
        config: &BuildConfig,
        share: &CaptureShare,
        output: &Path,
    ) -> FfuResult<PathBuf>;

    /// Capture the mounted build disk straight from the host.
    async fn capture_from_disk(
        &self,
        config: &BuildConfig,
        disk: &MountHandle,
        output: &Path,
    ) -> FfuResult<PathBuf>;

    /// Add drivers (and similar content) to a captured image.
    async fn inject_post_capture(&self, config: &BuildConfig, ffu: &Path) -> FfuResult<StepOutcome>;

    /// Finalise the image. Uninterruptible once started.
    async fn package(&self, config: &BuildConfig, ffu: &Path) -> FfuResult<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_user_debug_hides_password() {
        let user = CaptureUser {
            name: "ffu_user".into(),
            password: "hunter22".into(),
        };
        let text = format!("{user:?}");
        assert!(text.contains("ffu_user"));
        assert!(!text.contains("hunter22"));
    }
}
