//! Default build steps backed by DISM, bcdboot and PowerShell.
//!
//! Every external call goes through the [`CommandRunner`], so the same code
//! runs against real tools on a Windows host and a scripted runner in tests.

pub mod dism;
pub mod layout;
pub mod share;

use crate::config::BuildConfig;
use crate::orchestrator::{BuildSteps, CaptureShare, CaptureUser, StepOutcome};
use crate::provider::MountHandle;
use crate::tools::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use ffuforge_shared::errors::{FfuError, FfuResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// [`BuildSteps`] implementation for a Windows build host.
pub struct ImagingSteps {
    runner: Arc<dyn CommandRunner>,
    /// Host name the guest uses to reach the capture share.
    host: String,
}

impl ImagingSteps {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let host = std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string());
        Self { runner, host }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    async fn run(&self, spec: CommandSpec) -> FfuResult<CommandOutput> {
        let tool = spec.tool_name().to_string();
        self.runner.run(spec).await?.check(&tool)
    }

    async fn ps(&self, script: String, timeout: Duration) -> FfuResult<()> {
        self.run(CommandSpec::powershell(script, timeout)).await?;
        Ok(())
    }

    /// Like [`Self::ps`], reporting "does not exist" as `NotFound`.
    async fn ps_remove(&self, script: String, target: &str, timeout: Duration) -> FfuResult<()> {
        match self.ps(script, timeout).await {
            Err(FfuError::ExternalTool { detail, .. }) if share::is_missing(&detail) => {
                Err(FfuError::NotFound(target.to_string()))
            }
            other => other,
        }
    }
}

#[async_trait]
impl BuildSteps for ImagingSteps {
    async fn acquire_resources(&self, config: &BuildConfig) -> FfuResult<StepOutcome> {
        let Some(dir) = config.drivers_dir.clone() else {
            return Ok(StepOutcome::Skipped("no drivers directory configured".into()));
        };
        let count = tokio::task::spawn_blocking({
            let dir = dir.clone();
            move || count_driver_packages(&dir)
        })
        .await
        .map_err(|e| FfuError::Internal(format!("driver scan task failed: {e}")))?
        .map_err(|e| FfuError::Storage(format!("failed to scan {}: {}", dir.display(), e)))?;

        if count == 0 {
            return Ok(StepOutcome::Skipped(format!(
                "no driver packages (.inf) under {}",
                dir.display()
            )));
        }
        tracing::info!(drivers = count, dir = %dir.display(), "Driver packages ready");
        Ok(StepOutcome::Completed)
    }

    async fn apply_base_image(&self, config: &BuildConfig, disk: &MountHandle) -> FfuResult<()> {
        let image = config
            .base_image
            .as_deref()
            .ok_or_else(|| FfuError::Config("base_image is not set".into()))?;
        let root = disk.root().display().to_string();

        tracing::info!(image = %image.display(), index = config.image_index, target = %root, "Applying base image");
        self.run(dism::apply_image(
            image,
            config.image_index,
            &root,
            config.imaging_timeout(),
        ))
        .await?;

        self.ps(
            layout::recovery_partition_script(
                disk.disk_number,
                disk.drive_letter,
                config.recovery_margin_bytes,
            ),
            config.command_timeout(),
        )
        .await?;
        self.ps(
            layout::boot_files_script(disk.disk_number, disk.drive_letter),
            config.command_timeout(),
        )
        .await
    }

    async fn create_capture_user(&self, config: &BuildConfig) -> FfuResult<CaptureUser> {
        let user = CaptureUser {
            name: share::CAPTURE_USER.to_string(),
            password: share::generate_password(),
        };
        self.ps(
            share::new_local_user(&user.name, &user.password),
            config.command_timeout(),
        )
        .await?;
        tracing::info!(user = %user.name, "Created capture account");
        Ok(user)
    }

    async fn create_capture_share(
        &self,
        config: &BuildConfig,
        user: &CaptureUser,
    ) -> FfuResult<CaptureShare> {
        let path = config.work_dir.join("capture");
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| FfuError::Storage(format!("failed to create {}: {}", path.display(), e)))?;
        self.ps(
            share::new_smb_share(share::CAPTURE_SHARE, &path, &user.name),
            config.command_timeout(),
        )
        .await?;

        let share = CaptureShare {
            name: share::CAPTURE_SHARE.to_string(),
            unc: share::unc_path(&self.host, share::CAPTURE_SHARE),
            path,
        };
        tracing::info!(share = %share.unc, "Created capture share");
        Ok(share)
    }

    async fn remove_capture_share(&self, share: &CaptureShare) -> FfuResult<()> {
        self.ps_remove(
            share::remove_smb_share(&share.name),
            &share.unc,
            Duration::from_secs(60),
        )
        .await
    }

    async fn remove_capture_user(&self, user: &CaptureUser) -> FfuResult<()> {
        self.ps_remove(
            share::remove_local_user(&user.name),
            &user.name,
            Duration::from_secs(60),
        )
        .await
    }

    async fn collect_guest_capture(
        &self,
        _config: &BuildConfig,
        share: &CaptureShare,
        output: &Path,
    ) -> FfuResult<PathBuf> {
        let captured = find_ffu(&share.path).await?.ok_or_else(|| {
            FfuError::Storage(format!(
                "capture media wrote no .ffu file to {}",
                share.path.display()
            ))
        })?;
        move_file(&captured, output).await?;
        tracing::info!(from = %captured.display(), to = %output.display(), "Collected guest capture");
        Ok(output.to_path_buf())
    }

    async fn capture_from_disk(
        &self,
        config: &BuildConfig,
        disk: &MountHandle,
        output: &Path,
    ) -> FfuResult<PathBuf> {
        self.run(dism::capture_ffu(
            &disk.physical_drive(),
            output,
            &config.vm_name,
            config.imaging_timeout(),
        ))
        .await?;
        Ok(output.to_path_buf())
    }

    async fn inject_post_capture(&self, config: &BuildConfig, ffu: &Path) -> FfuResult<StepOutcome> {
        let Some(drivers) = config.drivers_dir.as_deref() else {
            return Ok(StepOutcome::Skipped("no drivers directory configured".into()));
        };
        let timeout = config.imaging_timeout();
        let mount_dir = config.work_dir.join("mount");
        tokio::fs::create_dir_all(&mount_dir).await.map_err(|e| {
            FfuError::Storage(format!("failed to create {}: {}", mount_dir.display(), e))
        })?;

        self.run(dism::mount_image(ffu, &mount_dir, timeout)).await?;
        if let Err(e) = self.run(dism::add_driver(&mount_dir, drivers, timeout)).await {
            if let Err(discard) = self.run(dism::unmount_image(&mount_dir, false, timeout)).await {
                tracing::warn!(mount = %mount_dir.display(), "Failed to discard image mount: {}", discard);
            }
            return Err(e);
        }
        self.run(dism::unmount_image(&mount_dir, true, timeout)).await?;
        Ok(StepOutcome::Completed)
    }

    async fn package(&self, config: &BuildConfig, ffu: &Path) -> FfuResult<PathBuf> {
        if config.optimize {
            self.run(dism::optimize_ffu(ffu, config.imaging_timeout()))
                .await?;
        }
        Ok(ffu.to_path_buf())
    }
}

fn count_driver_packages(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            count += count_driver_packages(&path)?;
        } else if has_extension(&path, "inf") {
            count += 1;
        }
    }
    Ok(count)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

async fn find_ffu(dir: &Path) -> FfuResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| FfuError::Storage(format!("failed to read {}: {}", dir.display(), e)))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FfuError::Storage(e.to_string()))?
    {
        let path = entry.path();
        if has_extension(&path, "ffu") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Rename, falling back to copy + delete across volumes.
async fn move_file(from: &Path, to: &Path) -> FfuResult<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await.map_err(|e| {
        FfuError::Storage(format!("failed to copy {} to {}: {}", from.display(), to.display(), e))
    })?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| FfuError::Storage(format!("failed to remove {}: {}", from.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::fake::RuleRunner;
    use tempfile::TempDir;

    fn handle() -> MountHandle {
        MountHandle {
            disk_path: PathBuf::from("C:\\FFU\\_FFU-Build.vhdx"),
            disk_number: 3,
            drive_letter: 'W',
        }
    }

    fn config(dir: &Path) -> BuildConfig {
        BuildConfig {
            work_dir: dir.to_path_buf(),
            base_image: Some(dir.join("install.wim")),
            image_index: 6,
            ..BuildConfig::default()
        }
    }

    #[tokio::test]
    async fn test_apply_base_image_sequence() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RuleRunner::new());
        let steps = ImagingSteps::new(runner.clone());

        steps.apply_base_image(&config(dir.path()), &handle()).await.unwrap();

        let lines = runner.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("dism.exe"));
        assert!(lines[0].contains("/Index:6"));
        assert!(lines[0].contains("/ApplyDir:W:\\"));
        assert!(lines[1].contains("Resize-Partition -DriveLetter W"));
        assert!(lines[2].contains("bcdboot.exe W:\\Windows"));
    }

    #[tokio::test]
    async fn test_apply_failure_stops_sequence() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            RuleRunner::new().on("/Apply-Image", CommandOutput::failure(5, "Error: 5 Access is denied.")),
        );
        let steps = ImagingSteps::new(runner.clone());

        let err = steps
            .apply_base_image(&config(dir.path()), &handle())
            .await
            .unwrap_err();
        assert!(matches!(err, FfuError::ExternalTool { code: Some(5), .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_from_disk_uses_physical_drive() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RuleRunner::new());
        let steps = ImagingSteps::new(runner.clone());
        let output = dir.path().join("out.ffu");

        let ffu = steps
            .capture_from_disk(&config(dir.path()), &handle(), &output)
            .await
            .unwrap();
        assert_eq!(ffu, output);
        let lines = runner.lines();
        assert!(lines[0].contains("/Capture-FFU"));
        assert!(lines[0].contains("PhysicalDrive3"));
    }

    #[tokio::test]
    async fn test_inject_skipped_without_drivers() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RuleRunner::new());
        let steps = ImagingSteps::new(runner.clone());

        let outcome = steps
            .inject_post_capture(&config(dir.path()), &dir.path().join("a.ffu"))
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inject_failure_discards_mount() {
        let dir = TempDir::new().unwrap();
        let drivers = dir.path().join("drivers");
        std::fs::create_dir_all(&drivers).unwrap();
        let mut cfg = config(dir.path());
        cfg.drivers_dir = Some(drivers);

        let runner = Arc::new(RuleRunner::new().on("/Add-Driver", CommandOutput::failure(2, "bad inf")));
        let steps = ImagingSteps::new(runner.clone());

        assert!(steps
            .inject_post_capture(&cfg, &dir.path().join("a.ffu"))
            .await
            .is_err());
        let lines = runner.lines();
        assert!(lines[0].contains("/Mount-Image"));
        assert!(lines[2].contains("/Unmount-Image"));
        assert!(lines[2].contains("/Discard"));
    }

    #[tokio::test]
    async fn test_acquire_counts_inf_files() {
        let dir = TempDir::new().unwrap();
        let drivers = dir.path().join("drivers");
        std::fs::create_dir_all(drivers.join("net")).unwrap();
        let steps = ImagingSteps::new(Arc::new(RuleRunner::new()));
        let mut cfg = config(dir.path());
        cfg.drivers_dir = Some(drivers.clone());

        let empty = steps.acquire_resources(&cfg).await.unwrap();
        assert!(matches!(empty, StepOutcome::Skipped(_)));

        std::fs::write(drivers.join("net").join("e1000.INF"), b"[Version]").unwrap();
        assert_eq!(steps.acquire_resources(&cfg).await.unwrap(), StepOutcome::Completed);
    }

    #[tokio::test]
    async fn test_remove_missing_user_is_not_found() {
        let runner = Arc::new(RuleRunner::new().on(
            "Remove-LocalUser",
            CommandOutput::failure(1, "User ffu_user was not found."),
        ));
        let steps = ImagingSteps::new(runner);
        let user = CaptureUser {
            name: "ffu_user".into(),
            password: "x".into(),
        };
        assert!(steps.remove_capture_user(&user).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_collect_moves_guest_image() {
        let dir = TempDir::new().unwrap();
        let share_dir = dir.path().join("capture");
        std::fs::create_dir_all(&share_dir).unwrap();
        std::fs::write(share_dir.join("Win11.ffu"), b"ffu").unwrap();
        let steps = ImagingSteps::new(Arc::new(RuleRunner::new())).with_host("BUILD01");
        let share = CaptureShare {
            name: share::CAPTURE_SHARE.into(),
            path: share_dir.clone(),
            unc: share::unc_path("BUILD01", share::CAPTURE_SHARE),
        };
        let output = dir.path().join("final.ffu");

        let ffu = steps
            .collect_guest_capture(&config(dir.path()), &share, &output)
            .await
            .unwrap();
        assert_eq!(ffu, output);
        assert!(output.exists());
        assert!(!share_dir.join("Win11.ffu").exists());
    }

    #[tokio::test]
    async fn test_collect_without_image_fails() {
        let dir = TempDir::new().unwrap();
        let steps = ImagingSteps::new(Arc::new(RuleRunner::new()));
        let share = CaptureShare {
            name: share::CAPTURE_SHARE.into(),
            path: dir.path().to_path_buf(),
            unc: "\\\\h\\s".into(),
        };
        let err = steps
            .collect_guest_capture(&config(dir.path()), &share, &dir.path().join("o.ffu"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfuError::Storage(_)));
    }

    #[tokio::test]
    async fn test_package_optimizes_when_enabled() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RuleRunner::new());
        let steps = ImagingSteps::new(runner.clone());
        let mut cfg = config(dir.path());
        let ffu = dir.path().join("a.ffu");

        steps.package(&cfg, &ffu).await.unwrap();
        assert!(runner.lines()[0].contains("/Optimize-FFU"));

        cfg.optimize = false;
        steps.package(&cfg, &ffu).await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }
}
