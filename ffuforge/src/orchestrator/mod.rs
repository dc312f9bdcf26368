//! Build phase orchestrator.
//!
//! Drives one build through the fixed phase sequence on a single worker.
//! Each phase boundary is a checkpoint: a pending cancellation is honoured
//! there (cleanup first, then `Cancelled`), otherwise a weighted progress
//! message is emitted. Every resource the build creates is registered with
//! the [`CleanupRegistry`] before anything else touches it, so a failure or
//! cancellation at any point tears down exactly what exists.

mod phase;
mod report;
mod steps;

pub use phase::BuildPhase;
pub use report::BuildReport;
pub use steps::{BuildSteps, CaptureShare, CaptureUser, StepOutcome};

use crate::channel::{BuildChannel, BuildState};
use crate::cleanup::{
    ActionId, CleanupKind, CleanupOutcome, CleanupRegistry, CleanupResult, remove_file_idempotent,
};
use crate::config::BuildConfig;
use crate::provider::{DiskType, HypervisorProvider, MountHandle, VmInfo, VmState};
use ffuforge_shared::constants::{polling, sources};
use ffuforge_shared::errors::{FfuError, FfuResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why the phase sequence stopped early.
enum Interrupt {
    Cancelled(BuildPhase),
    Failed(BuildPhase, FfuError),
}

type PhaseResult<T> = Result<T, Interrupt>;

trait AtPhase<T> {
    fn at(self, phase: BuildPhase) -> PhaseResult<T>;
}

impl<T> AtPhase<T> for FfuResult<T> {
    fn at(self, phase: BuildPhase) -> PhaseResult<T> {
        self.map_err(|e| Interrupt::Failed(phase, e))
    }
}

/// A resource paired with the cleanup action that removes it.
struct Tracked<T> {
    value: T,
    cleanup: ActionId,
}

struct BuildVm {
    info: VmInfo,
    cleanup: ActionId,
    iso: ActionId,
}

/// Runs one build. Single use: a second [`run`](Self::run) is refused.
pub struct BuildOrchestrator {
    config: Arc<BuildConfig>,
    provider: Arc<dyn HypervisorProvider>,
    steps: Arc<dyn BuildSteps>,
    channel: BuildChannel,
    registry: CleanupRegistry,
    phase: BuildPhase,
}

impl BuildOrchestrator {
    pub fn new(
        config: Arc<BuildConfig>,
        provider: Arc<dyn HypervisorProvider>,
        steps: Arc<dyn BuildSteps>,
        channel: BuildChannel,
    ) -> Self {
        Self {
            config,
            provider,
            steps,
            channel,
            registry: CleanupRegistry::new(),
            phase: BuildPhase::Validate,
        }
    }

    pub fn channel(&self) -> &BuildChannel {
        &self.channel
    }

    /// Cleanup actions still pending.
    pub fn registry(&self) -> &CleanupRegistry {
        &self.registry
    }

    /// Phase most recently entered.
    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    /// Run the build to a terminal state.
    ///
    /// Never panics or returns early on failure: the outcome, including
    /// any resources cleanup could not remove, is in the report.
    pub async fn run(&mut self) -> BuildReport {
        if !self.channel.request_state(BuildState::Initializing) {
            let mut report = BuildReport::new(self.channel.state());
            report.error = Some("build has already been started".to_string());
            report.error_kind = Some("invalid_state");
            return report;
        }
        tracing::info!(vm = %self.config.vm_name, provider = %self.provider.kind(), "Build started");

        match self.run_phases().await {
            Ok(ffu) => self.finish_completed(ffu),
            Err(Interrupt::Cancelled(phase)) => self.finish_cancelled(phase).await,
            Err(Interrupt::Failed(phase, error)) => self.finish_failed(phase, error).await,
        }
    }

    async fn run_phases(&mut self) -> PhaseResult<PathBuf> {
        if !self.provider.test_available().await {
            return Err(Interrupt::Failed(
                BuildPhase::Validate,
                FfuError::ProviderUnavailable(format!(
                    "{} is not installed or not running",
                    self.provider.kind()
                )),
            ));
        }

        self.checkpoint(BuildPhase::Validate)?;
        self.validate()?;
        self.channel.request_state(BuildState::Running);

        self.checkpoint(BuildPhase::AcquireResources)?;
        self.acquire_resources().await?;

        self.checkpoint(BuildPhase::PrepareDisk)?;
        let disk = self.prepare_disk().await?;

        self.checkpoint(BuildPhase::CreateVm)?;
        let mut vm = if self.config.install_apps() {
            Some(self.create_vm().await?)
        } else {
            self.channel.info(
                sources::ORCHESTRATOR,
                "No apps ISO configured; capturing the disk directly",
            );
            None
        };

        // Point of no return: the guest boots after this checkpoint.
        self.checkpoint(BuildPhase::RunGuestWorkload)?;
        if let Some(vm) = vm.as_mut() {
            self.run_guest_workload(vm).await?;
        }

        self.checkpoint(BuildPhase::Capture)?;
        let ffu = match vm {
            Some(vm) => self.capture_from_guest(vm).await?,
            None => self.capture_from_disk(&disk).await?,
        };

        self.checkpoint(BuildPhase::InjectPostCaptureContent)?;
        self.inject_post_capture(&ffu.value).await?;

        self.checkpoint(BuildPhase::Package)?;
        let output = self.package(ffu).await?;
        self.release_disk(disk).await;

        self.phase = BuildPhase::Done;
        self.channel.progress(
            sources::ORCHESTRATOR,
            BuildPhase::Done.start_percent(),
            BuildPhase::Done.label(),
        );
        Ok(output)
    }

    /// Phase boundary: honour cancellation or report progress.
    fn checkpoint(&mut self, phase: BuildPhase) -> PhaseResult<()> {
        self.phase = phase;
        if self.channel.is_cancellation_requested() {
            return Err(Interrupt::Cancelled(phase));
        }
        tracing::info!(phase = %phase, "Entering phase");
        self.channel
            .progress(sources::ORCHESTRATOR, phase.start_percent(), phase.label());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Phases
    // ─────────────────────────────────────────────────────────────────────

    fn validate(&mut self) -> PhaseResult<()> {
        let phase = self.phase;
        self.config.validate().at(phase)?;

        let report = self
            .provider
            .validate_configuration(&self.config.vm_configuration());
        let warnings = report.into_result().at(phase)?;
        for warning in warnings {
            self.channel.warning(sources::ORCHESTRATOR, warning);
        }
        Ok(())
    }

    async fn acquire_resources(&mut self) -> PhaseResult<()> {
        let outcome = self
            .steps
            .acquire_resources(&self.config)
            .await
            .at(self.phase)?;
        self.report_step("Resource acquisition", outcome);
        Ok(())
    }

    async fn prepare_disk(&mut self) -> PhaseResult<Tracked<PathBuf>> {
        let phase = self.phase;
        let requested = self.config.resolved_disk_path();
        ensure_parent(&requested).await.at(phase)?;

        let path = self
            .provider
            .new_virtual_disk(
                &requested,
                self.config.disk_size_bytes,
                self.config.disk_format,
                DiskType::Dynamic,
            )
            .await
            .at(phase)?;
        let disk_id = self.register_file(CleanupKind::VirtualDisk, path.clone());
        self.channel.info(
            sources::ORCHESTRATOR,
            format!("Created build disk {}", path.display()),
        );

        let mount = self.mount(&path).await?;
        self.channel.info(
            sources::ORCHESTRATOR,
            format!("Applying base image to {}", mount.value.root().display()),
        );
        self.steps
            .apply_base_image(&self.config, &mount.value)
            .await
            .at(phase)?;
        self.release(mount.cleanup).await?;

        Ok(Tracked {
            value: path,
            cleanup: disk_id,
        })
    }

    async fn create_vm(&mut self) -> PhaseResult<BuildVm> {
        let phase = self.phase;
        let info = self
            .provider
            .create_vm(&self.config.vm_configuration())
            .await
            .at(phase)?;

        let provider = self.provider.clone();
        let target = info.clone();
        let vm_id = self.registry.register(CleanupKind::Vm, info.name.clone(), move || {
            let provider = provider.clone();
            let vm = target.clone();
            async move { provider.remove_vm(&vm, false).await }
        });
        self.channel.info(
            sources::ORCHESTRATOR,
            format!("Created VM '{}'", info.name),
        );

        let iso = self.required_path(self.config.apps_iso.as_deref(), "apps_iso")?;
        self.provider.attach_iso(&info, &iso).await.at(phase)?;
        let iso_id = self.register_iso(&info, &iso);

        Ok(BuildVm {
            info,
            cleanup: vm_id,
            iso: iso_id,
        })
    }

    async fn run_guest_workload(&mut self, vm: &mut BuildVm) -> PhaseResult<()> {
        self.channel.info(
            sources::ORCHESTRATOR,
            format!(
                "Starting VM '{}'; the guest installs applications and shuts down when done",
                vm.info.name
            ),
        );
        self.start_vm(&mut vm.info).await?;
        self.wait_for_power_off(&mut vm.info).await?;
        self.channel.info(sources::ORCHESTRATOR, "Guest workload finished");
        Ok(())
    }

    /// Install-then-capture: the guest boots capture media and writes the
    /// image to a temporary share under a temporary account.
    async fn capture_from_guest(&mut self, mut vm: BuildVm) -> PhaseResult<Tracked<PathBuf>> {
        let phase = self.phase;

        let user = self
            .steps
            .create_capture_user(&self.config)
            .await
            .at(phase)?;
        let steps = self.steps.clone();
        let account = user.clone();
        let user_id = self
            .registry
            .register(CleanupKind::UserAccount, user.name.clone(), move || {
                let steps = steps.clone();
                let account = account.clone();
                async move { steps.remove_capture_user(&account).await }
            });

        let share = self
            .steps
            .create_capture_share(&self.config, &user)
            .await
            .at(phase)?;
        let steps = self.steps.clone();
        let target = share.clone();
        let share_id = self
            .registry
            .register(CleanupKind::NetworkShare, share.unc.clone(), move || {
                let steps = steps.clone();
                let share = target.clone();
                async move { steps.remove_capture_share(&share).await }
            });

        let capture_iso = self.required_path(self.config.capture_iso.as_deref(), "capture_iso")?;
        self.provider.detach_iso(&vm.info).await.at(phase)?;
        self.provider
            .attach_iso(&vm.info, &capture_iso)
            .await
            .at(phase)?;

        self.channel.info(
            sources::ORCHESTRATOR,
            format!("Booting capture media; the guest writes the image to {}", share.unc),
        );
        self.start_vm(&mut vm.info).await?;
        self.wait_for_power_off(&mut vm.info).await?;

        let output = self.config.resolved_output_path();
        ensure_parent(&output).await.at(phase)?;
        let ffu = self
            .steps
            .collect_guest_capture(&self.config, &share, &output)
            .await
            .at(phase)?;
        let ffu_id = self.register_file(CleanupKind::TempFile, ffu.clone());

        self.release_best_effort(vm.iso).await;
        self.release_best_effort(vm.cleanup).await;
        self.release_best_effort(share_id).await;
        self.release_best_effort(user_id).await;

        Ok(Tracked {
            value: ffu,
            cleanup: ffu_id,
        })
    }

    /// Direct capture: the host mounts the build disk and images it.
    async fn capture_from_disk(&mut self, disk: &Tracked<PathBuf>) -> PhaseResult<Tracked<PathBuf>> {
        let phase = self.phase;
        let mount = self.mount(&disk.value).await?;

        let output = self.config.resolved_output_path();
        ensure_parent(&output).await.at(phase)?;
        // the imaging tool may leave a partial file behind on failure
        let ffu_id = self.register_file(CleanupKind::TempFile, output.clone());
        self.channel.info(
            sources::ORCHESTRATOR,
            format!("Capturing {} to {}", mount.value.physical_drive(), output.display()),
        );
        let ffu = self
            .steps
            .capture_from_disk(&self.config, &mount.value, &output)
            .await
            .at(phase)?;
        self.release(mount.cleanup).await?;

        Ok(Tracked {
            value: ffu,
            cleanup: ffu_id,
        })
    }

    async fn inject_post_capture(&mut self, ffu: &Path) -> PhaseResult<()> {
        let outcome = self
            .steps
            .inject_post_capture(&self.config, ffu)
            .await
            .at(self.phase)?;
        self.report_step("Post-capture injection", outcome);
        Ok(())
    }

    async fn package(&mut self, ffu: Tracked<PathBuf>) -> PhaseResult<PathBuf> {
        // Packaging cannot be interrupted once the tool starts.
        if self.channel.is_cancellation_requested() {
            return Err(Interrupt::Cancelled(self.phase));
        }
        let output = self
            .steps
            .package(&self.config, &ffu.value)
            .await
            .at(self.phase)?;
        self.registry.unregister(ffu.cleanup);
        Ok(output)
    }

    async fn release_disk(&mut self, disk: Tracked<PathBuf>) {
        if self.config.keep_disk {
            self.registry.unregister(disk.cleanup);
            self.channel.info(
                sources::ORCHESTRATOR,
                format!("Build disk kept at {}", disk.value.display()),
            );
        } else {
            self.release_best_effort(disk.cleanup).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resource helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn mount(&mut self, path: &Path) -> PhaseResult<Tracked<MountHandle>> {
        let handle = self
            .provider
            .mount_virtual_disk(path)
            .await
            .at(self.phase)?;
        let provider = self.provider.clone();
        let disk = path.to_path_buf();
        let id = self.registry.register(
            CleanupKind::MountedImage,
            format!("{} ({})", path.display(), handle.root().display()),
            move || {
                let provider = provider.clone();
                let disk = disk.clone();
                async move { provider.dismount_virtual_disk(&disk).await }
            },
        );
        Ok(Tracked {
            value: handle,
            cleanup: id,
        })
    }

    async fn start_vm(&mut self, vm: &mut VmInfo) -> PhaseResult<()> {
        let bound = self.config.vm_start_timeout();
        match tokio::time::timeout(bound, self.provider.start_vm(vm, self.config.show_console)).await {
            Ok(result) => result.at(self.phase),
            Err(_) => Err(Interrupt::Failed(
                self.phase,
                FfuError::timeout(format!("starting VM '{}'", vm.name), bound),
            )),
        }
    }

    /// Poll until the guest powers itself off.
    ///
    /// A run of `Unknown` answers triggers an existence check, so a VM
    /// deleted underneath the build fails with `VmNotFound` instead of
    /// waiting out the shutdown bound.
    async fn wait_for_power_off(&mut self, vm: &mut VmInfo) -> PhaseResult<()> {
        let bound = self.config.vm_shutdown_timeout();
        let interval = self.config.state_poll_interval();
        let started = Instant::now();
        let mut unknown = 0;
        loop {
            let state = vm.refresh_state(self.provider.as_ref()).await;
            if state.is_off() {
                tracing::debug!(vm = %vm.name, elapsed = ?started.elapsed(), "VM powered off");
                return Ok(());
            }
            if state == VmState::Unknown {
                unknown += 1;
            } else {
                unknown = 0;
            }
            if unknown >= polling::UNKNOWN_STATES_BEFORE_EXISTS_CHECK {
                unknown = 0;
                match self.provider.vm_exists(vm).await {
                    Ok(false) => {
                        return Err(Interrupt::Failed(
                            self.phase,
                            FfuError::VmNotFound(vm.name.clone()),
                        ));
                    }
                    Ok(true) => {}
                    Err(e) => tracing::debug!(vm = %vm.name, "Existence check failed: {}", e),
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= bound {
                return Err(Interrupt::Failed(
                    self.phase,
                    FfuError::timeout(format!("waiting for VM '{}' to power off", vm.name), elapsed),
                ));
            }
            tokio::time::sleep(interval.min(bound.saturating_sub(elapsed)).max(Duration::from_millis(1)))
                .await;
        }
    }

    fn register_file(&mut self, kind: CleanupKind, path: PathBuf) -> ActionId {
        let target = path.display().to_string();
        self.registry.register(kind, target, move || {
            let path = path.clone();
            async move { remove_file_idempotent(&path).await }
        })
    }

    fn register_iso(&mut self, vm: &VmInfo, iso: &Path) -> ActionId {
        let provider = self.provider.clone();
        let target = vm.clone();
        self.registry.register(
            CleanupKind::Iso,
            format!("{} in '{}'", iso.display(), vm.name),
            move || {
                let provider = provider.clone();
                let vm = target.clone();
                async move { provider.detach_iso(&vm).await }
            },
        )
    }

    fn required_path(&self, path: Option<&Path>, field: &str) -> PhaseResult<PathBuf> {
        path.map(Path::to_path_buf).ok_or_else(|| {
            Interrupt::Failed(self.phase, FfuError::Config(format!("{field} is not set")))
        })
    }

    /// Tear down a resource the build no longer needs; failure fails the phase.
    async fn release(&mut self, id: ActionId) -> PhaseResult<()> {
        match self.registry.invoke(id).await {
            Some(CleanupOutcome {
                kind,
                target,
                result: CleanupResult::Failed(reason),
                ..
            }) => Err(Interrupt::Failed(
                self.phase,
                FfuError::Cleanup {
                    target: format!("{kind} {target}"),
                    reason,
                },
            )),
            _ => Ok(()),
        }
    }

    /// Tear down a resource the build no longer needs; failure is a warning
    /// and the action stays registered.
    async fn release_best_effort(&mut self, id: ActionId) {
        if let Some(outcome) = self.registry.invoke(id).await
            && let CleanupResult::Failed(reason) = &outcome.result
        {
            self.channel.warning(
                sources::CLEANUP,
                format!("Could not remove {} {}: {}", outcome.kind, outcome.target, reason),
            );
        }
    }

    fn report_step(&self, what: &str, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Completed => self
                .channel
                .info(sources::ORCHESTRATOR, format!("{what} complete")),
            StepOutcome::Skipped(reason) => self
                .channel
                .info(sources::ORCHESTRATOR, format!("{what} skipped: {reason}")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Terminal states
    // ─────────────────────────────────────────────────────────────────────

    fn finish_completed(&mut self, ffu: PathBuf) -> BuildReport {
        let mut report = BuildReport::new(BuildState::Completed);
        report.pending_cleanup = self.pending_targets();
        for leftover in &report.pending_cleanup {
            self.channel.warning(
                sources::CLEANUP,
                format!("{leftover} was not removed; remove it manually"),
            );
        }
        self.registry.clear();
        self.channel.request_state(BuildState::Completed);
        self.channel.success(
            sources::ORCHESTRATOR,
            format!("FFU created at {}", ffu.display()),
        );
        tracing::info!(ffu = %ffu.display(), "Build completed");
        report.ffu_path = Some(ffu);
        report
    }

    async fn finish_cancelled(&mut self, phase: BuildPhase) -> BuildReport {
        self.channel.warning(
            sources::ORCHESTRATOR,
            format!("Build cancelled at {phase}"),
        );
        self.channel.request_state(BuildState::Cancelling);
        let outcomes = self
            .registry
            .invoke_all(&format!("user cancelled at {phase}"))
            .await;
        self.report_cleanup(&outcomes);
        self.channel.request_state(BuildState::Cancelled);

        let mut report = BuildReport::new(BuildState::Cancelled);
        report.failed_phase = Some(phase);
        report.error = Some(FfuError::Cancelled(phase.to_string()).to_string());
        report.error_kind = Some("cancelled");
        report.cleanup = outcomes;
        report.pending_cleanup = self.pending_targets();
        report
    }

    async fn finish_failed(&mut self, phase: BuildPhase, error: FfuError) -> BuildReport {
        self.channel.error(
            sources::ORCHESTRATOR,
            format!("{} failed: {}", phase.label(), error),
        );
        tracing::error!(phase = %phase, kind = error.kind_name(), "Build failed: {}", error);

        // Whatever is registered exists, whichever error stopped the build.
        let outcomes = if self.registry.is_empty() {
            Vec::new()
        } else {
            self.registry.invoke_all(&error.to_string()).await
        };
        self.report_cleanup(&outcomes);
        self.channel.request_state(BuildState::Failed);

        let mut report = BuildReport::new(BuildState::Failed);
        report.failed_phase = Some(phase);
        report.error_kind = Some(error.kind_name());
        report.error = Some(error.to_string());
        report.cleanup = outcomes;
        report.pending_cleanup = self.pending_targets();
        report
    }

    fn report_cleanup(&self, outcomes: &[CleanupOutcome]) {
        if outcomes.is_empty() {
            return;
        }
        let mut failed = 0;
        for outcome in outcomes {
            if let CleanupResult::Failed(reason) = &outcome.result {
                failed += 1;
                self.channel.warning(
                    sources::CLEANUP,
                    format!("Could not remove {} {}: {}", outcome.kind, outcome.target, reason),
                );
            }
        }
        if failed == 0 {
            self.channel.info(
                sources::CLEANUP,
                format!("Removed {} build resource(s)", outcomes.len()),
            );
        } else {
            self.channel.warning(
                sources::CLEANUP,
                format!("{failed} of {} build resource(s) need manual removal", outcomes.len()),
            );
        }
    }

    fn pending_targets(&self) -> Vec<String> {
        self.registry
            .pending()
            .iter()
            .map(|a| format!("{} {}", a.kind, a.target))
            .collect()
    }
}

async fn ensure_parent(path: &Path) -> FfuResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FfuError::Storage(format!("failed to create {}: {}", parent.display(), e))),
        _ => Ok(()),
    }
}
