//! Hyper-V backend.
//!
//! Drives the Hyper-V PowerShell module through the command runner. VM
//! state and guest addresses come from `Get-VM` / `Get-VMNetworkAdapter`
//! (integration services); virtual disks from the Hyper-V storage cmdlets.

mod script;

use super::layout;
use super::mount::{MountHandle, VolumeOps, resolve_drive_letter};
use super::registry::ProviderRegistration;
use super::validation::ProviderCapabilities;
use super::{
    DiskFormat, DiskType, HypervisorProvider, ProviderKind, ProviderOptions, VmConfiguration,
    VmInfo, VmState,
};
use crate::tools::CommandSpec;
use async_trait::async_trait;
use chrono::Utc;
use ffuforge_shared::errors::{FfuError, FfuResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TOOL: &str = "powershell";

/// Output of the `New-VM` snippet.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedVm {
    id: String,
    name: String,
    configuration_location: Option<String>,
}

pub struct HyperVProvider {
    options: ProviderOptions,
}

impl HyperVProvider {
    pub fn new(options: ProviderOptions) -> Self {
        Self { options }
    }

    /// Run a snippet and return trimmed stdout; nonzero exit is an error.
    async fn ps(&self, script: String) -> FfuResult<String> {
        let spec = CommandSpec::powershell(script, self.options.command_timeout);
        let output = self.options.runner.run(spec).await?.check(TOOL)?;
        Ok(output.stdout.trim().to_string())
    }

    /// Like [`Self::ps`], mapping "VM does not exist" to `VmNotFound`.
    async fn ps_vm(&self, vm_name: &str, script: String) -> FfuResult<String> {
        self.ps(script).await.map_err(|e| map_vm_error(e, vm_name))
    }
}

/// Map Hyper-V's "not found" messages onto the error taxonomy.
fn map_vm_error(err: FfuError, vm_name: &str) -> FfuError {
    match err {
        FfuError::ExternalTool { ref detail, .. } if is_missing_vm(detail) => {
            FfuError::VmNotFound(vm_name.to_string())
        }
        other => other,
    }
}

fn is_missing_vm(detail: &str) -> bool {
    let detail = detail.to_lowercase();
    detail.contains("unable to find a virtual machine") || detail.contains("objectnotfound")
}

fn map_disk_error(err: FfuError, path: &Path) -> FfuError {
    match err {
        FfuError::ExternalTool { ref detail, .. } => {
            let lower = detail.to_lowercase();
            if lower.contains("is not attached") || lower.contains("cannot find") {
                FfuError::NotFound(path.display().to_string())
            } else {
                err
            }
        }
        other => other,
    }
}

/// Creation failures are provisioning failures; timeouts stay timeouts.
fn provisioning(err: FfuError, what: &str) -> FfuError {
    match err {
        FfuError::ExternalTool { tool, detail, .. } => {
            FfuError::Provisioning(format!("{what}: {tool}: {detail}"))
        }
        other => other,
    }
}

fn parse_letter(text: &str) -> Option<char> {
    text.trim()
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
}

#[async_trait]
impl VolumeOps for HyperVProvider {
    async fn query_letter(&self, disk_number: u32) -> FfuResult<Option<char>> {
        let out = self.ps(script::os_partition_letter(disk_number)).await?;
        Ok(parse_letter(&out))
    }

    async fn assign_letter(&self, disk_number: u32, letter: char) -> FfuResult<()> {
        self.ps(script::assign_letter(disk_number, letter)).await?;
        Ok(())
    }

    async fn used_letters(&self) -> FfuResult<Vec<char>> {
        let out = self.ps(script::used_letters()).await?;
        Ok(out.split(',').filter_map(parse_letter).collect())
    }
}

#[async_trait]
impl HypervisorProvider for HyperVProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HyperV
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_formats: vec![DiskFormat::Vhdx, DiskFormat::Vhd],
            max_processors: 240,
            ..Default::default()
        }
    }

    async fn test_available(&self) -> bool {
        match self.ps(script::service_status()).await {
            Ok(status) if status.eq_ignore_ascii_case("running") => true,
            Ok(status) => {
                tracing::warn!(status = %status, "Hyper-V management service is not running");
                false
            }
            Err(e) => {
                tracing::warn!("Hyper-V is not available: {}", e);
                false
            }
        }
    }

    async fn create_vm(&self, config: &VmConfiguration) -> FfuResult<VmInfo> {
        self.validate_configuration(config)
            .into_result()
            .map_err(|e| FfuError::Provisioning(e.to_string()))?;

        tracing::info!(vm = %config.name, memory_bytes = config.memory_bytes, "Creating Hyper-V VM");
        let out = self
            .ps(script::new_vm(config))
            .await
            .map_err(|e| provisioning(e, "New-VM"))?;
        let created: CreatedVm = serde_json::from_str(&out).map_err(|e| {
            FfuError::Provisioning(format!("unexpected New-VM output '{}': {}", out, e))
        })?;

        Ok(VmInfo {
            id: created.id,
            name: created.name,
            hypervisor: ProviderKind::HyperV,
            state: VmState::Off,
            memory_bytes: config.memory_bytes,
            ip_addresses: Vec::new(),
            config_path: created.configuration_location.map(PathBuf::from),
            disk_path: config.disk_path.clone(),
            created_at: Utc::now(),
        })
    }

    async fn start_vm(&self, vm: &mut VmInfo, show_console: bool) -> FfuResult<()> {
        if vm.state.is_running() {
            return Ok(());
        }
        if vm.state != VmState::Starting {
            vm.transition_to(VmState::Starting)?;
        }
        if let Err(e) = self.ps_vm(&vm.name, script::start_vm(&vm.name)).await {
            vm.refresh_state(self).await;
            return Err(e);
        }
        vm.transition_to(VmState::Running)?;
        tracing::info!(vm = %vm.name, "VM started");

        if show_console {
            // vmconnect outlives the build; it is not tracked.
            if let Err(e) = tokio::process::Command::new("vmconnect.exe")
                .args(["localhost", vm.name.as_str()])
                .spawn()
            {
                tracing::warn!(vm = %vm.name, "Failed to open VM console: {}", e);
            }
        }
        Ok(())
    }

    async fn stop_vm(&self, vm: &mut VmInfo, force: bool) -> FfuResult<()> {
        if vm.state.is_off() {
            return Ok(());
        }
        self.ps_vm(&vm.name, script::stop_vm(&vm.name, force))
            .await?;
        vm.transition_to(VmState::Off)?;
        tracing::info!(vm = %vm.name, force, "VM stopped");
        Ok(())
    }

    async fn remove_vm(&self, vm: &VmInfo, remove_disks: bool) -> FfuResult<()> {
        // Remove-VM refuses a running VM.
        if let Err(e) = self
            .ps_vm(&vm.name, script::stop_vm(&vm.name, true))
            .await
        {
            if e.is_not_found() {
                return Err(e);
            }
            tracing::debug!(vm = %vm.name, "Stop before removal failed: {}", e);
        }
        self.ps_vm(&vm.name, script::remove_vm(&vm.name, remove_disks))
            .await?;
        tracing::info!(vm = %vm.name, remove_disks, "VM removed");
        Ok(())
    }

    async fn get_vm_state(&self, vm: &VmInfo) -> VmState {
        match self.ps(script::vm_state(&vm.name)).await {
            Ok(text) => text.parse().unwrap_or(VmState::Unknown),
            Err(e) => {
                tracing::debug!(vm = %vm.name, "State query failed: {}", e);
                VmState::Unknown
            }
        }
    }

    async fn vm_exists(&self, vm: &VmInfo) -> FfuResult<bool> {
        match self.ps_vm(&vm.name, script::vm_state(&vm.name)).await {
            Ok(_) => Ok(true),
            Err(FfuError::VmNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_vm_ip_address(&self, vm: &VmInfo) -> Option<String> {
        match self.ps(script::vm_ip(&vm.name)).await {
            Ok(ip) if !ip.is_empty() => Some(ip),
            _ => None,
        }
    }

    async fn new_virtual_disk(
        &self,
        path: &Path,
        size_bytes: u64,
        format: DiskFormat,
        disk_type: DiskType,
    ) -> FfuResult<PathBuf> {
        if !self.capabilities().supported_formats.contains(&format) {
            return Err(FfuError::Provisioning(format!(
                "disk format {} is not supported by Hyper-V",
                format
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::info!(disk = %path.display(), size_bytes, ?disk_type, "Creating virtual disk");
        self.ps(script::new_vhd(path, size_bytes, disk_type))
            .await
            .map_err(|e| provisioning(e, "New-VHD"))?;
        Ok(path.to_path_buf())
    }

    async fn mount_virtual_disk(&self, path: &Path) -> FfuResult<MountHandle> {
        let out = self
            .ps(script::mount_vhd(path))
            .await
            .map_err(|e| provisioning(e, "Mount-VHD"))?;
        let disk_number: u32 = out.parse().map_err(|_| {
            FfuError::Provisioning(format!("unexpected Mount-VHD output '{}'", out))
        })?;

        let resolved = async {
            let style = self.ps(script::partition_style(disk_number)).await?;
            if style.eq_ignore_ascii_case("raw") {
                tracing::info!(disk_number, "Initialising raw disk as GPT");
                self.ps(layout::gpt_init_powershell(disk_number))
                    .await
                    .map_err(|e| provisioning(e, "Initialize-Disk"))?;
            }
            resolve_drive_letter(self, path, disk_number, &self.options.mount_retry).await
        }
        .await;

        match resolved {
            Ok(drive_letter) => Ok(MountHandle {
                disk_path: path.to_path_buf(),
                disk_number,
                drive_letter,
            }),
            Err(e) => {
                if let Err(detach) = self.dismount_virtual_disk(path).await {
                    tracing::warn!(disk = %path.display(), "Failed to detach after mount error: {}", detach);
                }
                Err(e)
            }
        }
    }

    async fn dismount_virtual_disk(&self, path: &Path) -> FfuResult<()> {
        self.ps(script::dismount_vhd(path))
            .await
            .map_err(|e| map_disk_error(e, path))?;
        tracing::debug!(disk = %path.display(), "Virtual disk detached");
        Ok(())
    }

    async fn attach_iso(&self, vm: &VmInfo, iso_path: &Path) -> FfuResult<()> {
        self.ps_vm(&vm.name, script::attach_iso(&vm.name, iso_path))
            .await
            .map_err(|e| provisioning(e, "Add-VMDvdDrive"))?;
        tracing::info!(vm = %vm.name, iso = %iso_path.display(), "ISO attached");
        Ok(())
    }

    async fn detach_iso(&self, vm: &VmInfo) -> FfuResult<()> {
        self.ps_vm(&vm.name, script::detach_iso(&vm.name)).await?;
        Ok(())
    }
}

fn create(options: ProviderOptions) -> FfuResult<Arc<dyn HypervisorProvider>> {
    Ok(Arc::new(HyperVProvider::new(options)))
}

inventory::submit! {
    ProviderRegistration {
        kind: ProviderKind::HyperV,
        factory: create,
    }
}
