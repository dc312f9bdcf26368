use crate::{Behaviour, Journal};
use async_trait::async_trait;
use ffuforge::config::BuildConfig;
use ffuforge::orchestrator::{BuildSteps, CaptureShare, CaptureUser, StepOutcome};
use ffuforge::provider::MountHandle;
use ffuforge_shared::errors::{FfuError, FfuResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Build steps that write small placeholder files instead of images.
///
/// Shares and accounts are tracked in memory; removing one twice reports
/// `NotFound`.
pub struct FakeSteps {
    journal: Journal,
    behaviour: Behaviour,
    acquire: Mutex<StepOutcome>,
    inject: Mutex<StepOutcome>,
    users: Mutex<HashSet<String>>,
    shares: Mutex<HashSet<String>>,
}

impl FakeSteps {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            behaviour: Behaviour::default(),
            acquire: Mutex::new(StepOutcome::Completed),
            inject: Mutex::new(StepOutcome::Completed),
            users: Mutex::new(HashSet::new()),
            shares: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_acquire_outcome(self, outcome: StepOutcome) -> Self {
        *self.acquire.lock() = outcome;
        self
    }

    pub fn with_inject_outcome(self, outcome: StepOutcome) -> Self {
        *self.inject.lock() = outcome;
        self
    }

    pub fn behaviour(&self) -> &Behaviour {
        &self.behaviour
    }

    pub fn user_exists(&self, name: &str) -> bool {
        self.users.lock().contains(name)
    }

    pub fn share_exists(&self, name: &str) -> bool {
        self.shares.lock().contains(name)
    }

    async fn enter(&self, op: &str) -> FfuResult<()> {
        self.journal.record(op);
        self.behaviour.enter(op).await
    }
}

fn write_placeholder(path: &Path) -> FfuResult<()> {
    std::fs::write(path, b"FFU").map_err(|e| FfuError::Storage(e.to_string()))
}

#[async_trait]
impl BuildSteps for FakeSteps {
    async fn acquire_resources(&self, _config: &BuildConfig) -> FfuResult<StepOutcome> {
        self.enter("acquire_resources").await?;
        Ok(self.acquire.lock().clone())
    }

    async fn apply_base_image(&self, _config: &BuildConfig, _disk: &MountHandle) -> FfuResult<()> {
        self.enter("apply_base_image").await
    }

    async fn create_capture_user(&self, _config: &BuildConfig) -> FfuResult<CaptureUser> {
        self.enter("create_capture_user").await?;
        let user = CaptureUser {
            name: "ffu_user".to_string(),
            password: "fake-password".to_string(),
        };
        self.users.lock().insert(user.name.clone());
        Ok(user)
    }

    async fn create_capture_share(
        &self,
        config: &BuildConfig,
        _user: &CaptureUser,
    ) -> FfuResult<CaptureShare> {
        self.enter("create_capture_share").await?;
        let path = config.work_dir.join("capture");
        std::fs::create_dir_all(&path).map_err(|e| FfuError::Storage(e.to_string()))?;
        let share = CaptureShare {
            name: "FFUCaptureShare".to_string(),
            unc: "\\\\localhost\\FFUCaptureShare".to_string(),
            path,
        };
        self.shares.lock().insert(share.name.clone());
        Ok(share)
    }

    async fn remove_capture_share(&self, share: &CaptureShare) -> FfuResult<()> {
        self.enter("remove_capture_share").await?;
        if self.shares.lock().remove(&share.name) {
            Ok(())
        } else {
            Err(FfuError::NotFound(share.unc.clone()))
        }
    }

    async fn remove_capture_user(&self, user: &CaptureUser) -> FfuResult<()> {
        self.enter("remove_capture_user").await?;
        if self.users.lock().remove(&user.name) {
            Ok(())
        } else {
            Err(FfuError::NotFound(user.name.clone()))
        }
    }

    async fn collect_guest_capture(
        &self,
        _config: &BuildConfig,
        _share: &CaptureShare,
        output: &Path,
    ) -> FfuResult<PathBuf> {
        self.enter("collect_guest_capture").await?;
        write_placeholder(output)?;
        Ok(output.to_path_buf())
    }

    async fn capture_from_disk(
        &self,
        _config: &BuildConfig,
        _disk: &MountHandle,
        output: &Path,
    ) -> FfuResult<PathBuf> {
        self.enter("capture_from_disk").await?;
        write_placeholder(output)?;
        Ok(output.to_path_buf())
    }

    async fn inject_post_capture(&self, _config: &BuildConfig, _ffu: &Path) -> FfuResult<StepOutcome> {
        self.enter("inject_post_capture").await?;
        Ok(self.inject.lock().clone())
    }

    async fn package(&self, _config: &BuildConfig, ffu: &Path) -> FfuResult<PathBuf> {
        self.enter("package").await?;
        Ok(ffu.to_path_buf())
    }
}
