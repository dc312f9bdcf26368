//! Desktop workstation hypervisor backend.
//!
//! VMs are described by a `.vmx` file, registered with the local `vmrest`
//! control plane and powered through it; `vmrun` checks availability and
//! opens the console. Host-side disk work falls back to diskpart.

mod diskpart;
mod rest;
mod vmx;

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
use ffuforge_shared::constants::memory::GIB;
use ffuforge_shared::errors::{FfuError, FfuResult};
use rest::{PowerOp, VmRestClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct WorkstationProvider {
    options: ProviderOptions,
    rest: VmRestClient,
}

impl WorkstationProvider {
    pub fn new(options: ProviderOptions) -> FfuResult<Self> {
        let rest = VmRestClient::new(&options.workstation, options.command_timeout)?;
        Ok(Self { options, rest })
    }

    fn vmrun(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(
            self.options.workstation.vmrun().to_string_lossy(),
            self.options.command_timeout,
        )
        .args(["-T", "ws"])
        .args(args.iter().copied())
    }

    async fn diskpart(&self, script: String) -> FfuResult<String> {
        let spec = CommandSpec::new("diskpart.exe", self.options.command_timeout).stdin(script);
        let output = self.options.runner.run(spec).await?.check(diskpart::TOOL)?;
        Ok(output.stdout)
    }

    fn descriptor(vm: &VmInfo) -> FfuResult<&Path> {
        vm.config_path
            .as_deref()
            .ok_or_else(|| FfuError::InvalidState(format!("VM '{}' has no .vmx descriptor", vm.name)))
    }

    async fn set_iso(&self, vm: &VmInfo, iso: Option<&Path>) -> FfuResult<()> {
        let path = Self::descriptor(vm)?;
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FfuError::VmNotFound(vm.name.clone())
            } else {
                FfuError::from(e)
            }
        })?;
        tokio::fs::write(path, vmx::with_iso(&text, iso)).await?;
        Ok(())
    }
}

fn provisioning(err: FfuError, what: &str) -> FfuError {
    match err {
        FfuError::ExternalTool { tool, detail, .. } => {
            FfuError::Provisioning(format!("{what}: {tool}: {}", detail.trim()))
        }
        other => other,
    }
}

/// Delete the VM directory; a build disk stored inside it survives unless
/// `remove_disks` is set.
async fn remove_vm_files(vm: &VmInfo, remove_disks: bool) -> FfuResult<()> {
    if let Some(dir) = vm.config_path.as_deref().and_then(Path::parent) {
        if remove_disks {
            crate::cleanup::remove_dir_idempotent(dir).await?;
        } else {
            crate::cleanup::remove_dir_keeping(dir, &vm.disk_path).await?;
        }
    }
    if remove_disks {
        crate::cleanup::remove_file_idempotent(&vm.disk_path).await?;
    }
    Ok(())
}

fn parse_power_state(text: &str) -> VmState {
    text.parse().unwrap_or(VmState::Unknown)
}

#[async_trait]
impl VolumeOps for WorkstationProvider {
    async fn query_letter(&self, disk_number: u32) -> FfuResult<Option<char>> {
        let out = self.diskpart(diskpart::detail_disk(disk_number)).await?;
        Ok(diskpart::os_volume_letter(&out))
    }

    async fn assign_letter(&self, disk_number: u32, letter: char) -> FfuResult<()> {
        self.diskpart(diskpart::assign_letter(disk_number, letter))
            .await?;
        Ok(())
    }

    async fn used_letters(&self) -> FfuResult<Vec<char>> {
        let out = self.diskpart(diskpart::list_volume()).await?;
        Ok(diskpart::parse_volumes(&out)
            .into_iter()
            .filter_map(|v| v.letter)
            .collect())
    }
}

#[async_trait]
impl HypervisorProvider for WorkstationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Workstation
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supported_formats: vec![DiskFormat::Vhd],
            max_memory_bytes: 128 * GIB,
            max_processors: 32,
            ..Default::default()
        }
    }

    async fn test_available(&self) -> bool {
        match self.options.runner.run(self.vmrun(&["list"])).await {
            Ok(out) if out.is_success() => {}
            Ok(out) => {
                tracing::warn!(code = ?out.code, "vmrun is not usable: {}", out.stderr.trim());
                return false;
            }
            Err(e) => {
                tracing::warn!("vmrun is not available: {}", e);
                return false;
            }
        }
        match self.rest.list().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("vmrest control plane is not available: {}", e);
                false
            }
        }
    }

    async fn create_vm(&self, config: &VmConfiguration) -> FfuResult<VmInfo> {
        self.validate_configuration(config)
            .into_result()
            .map_err(|e| FfuError::Provisioning(e.to_string()))?;

        tokio::fs::create_dir_all(&config.vm_dir).await?;
        let vmx_path = config.vm_dir.join(format!("{}.vmx", config.name));
        tokio::fs::write(&vmx_path, vmx::render(config)).await?;
        tracing::info!(vm = %config.name, vmx = %vmx_path.display(), "Wrote VM descriptor");

        let existing = self
            .rest
            .list()
            .await
            .map_err(|e| provisioning(e, "list VMs"))?
            .into_iter()
            .find(|entry| Path::new(&entry.path) == vmx_path);
        let id = match existing {
            Some(entry) => entry.id,
            None => match self.rest.register(&config.name, &vmx_path).await {
                Ok(id) => id,
                Err(e) => {
                    if let Err(remove) = tokio::fs::remove_file(&vmx_path).await {
                        tracing::warn!(vmx = %vmx_path.display(), "Failed to remove descriptor: {}", remove);
                    }
                    return Err(provisioning(e, "register VM"));
                }
            },
        };

        Ok(VmInfo {
            id,
            name: config.name.clone(),
            hypervisor: ProviderKind::Workstation,
            state: VmState::Off,
            memory_bytes: config.memory_bytes,
            ip_addresses: Vec::new(),
            config_path: Some(vmx_path),
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

        let started = if show_console {
            let vmx_path = Self::descriptor(vm)?.to_string_lossy().into_owned();
            match self
                .options
                .runner
                .run(self.vmrun(&["start", &vmx_path, "gui"]))
                .await
            {
                Ok(out) => out.check("vmrun").map(|_| ()),
                Err(e) => Err(e),
            }
        } else {
            self.rest.power(&vm.id, PowerOp::On).await.map(|_| ())
        };

        if let Err(e) = started {
            vm.refresh_state(self).await;
            return Err(e);
        }
        vm.transition_to(VmState::Running)?;
        tracing::info!(vm = %vm.name, "VM started");
        Ok(())
    }

    async fn stop_vm(&self, vm: &mut VmInfo, force: bool) -> FfuResult<()> {
        if vm.state.is_off() {
            return Ok(());
        }
        let op = if force { PowerOp::Off } else { PowerOp::Shutdown };
        self.rest.power(&vm.id, op).await?;
        vm.transition_to(VmState::Off)?;
        tracing::info!(vm = %vm.name, force, "VM stopped");
        Ok(())
    }

    async fn remove_vm(&self, vm: &VmInfo, remove_disks: bool) -> FfuResult<()> {
        match self.rest.power(&vm.id, PowerOp::Off).await {
            Err(e) if e.is_not_found() => return Err(e),
            Err(e) => tracing::debug!(vm = %vm.name, "Power off before removal failed: {}", e),
            Ok(_) => {}
        }
        self.rest.delete(&vm.id).await?;
        remove_vm_files(vm, remove_disks).await?;
        tracing::info!(vm = %vm.name, remove_disks, "VM removed");
        Ok(())
    }

    async fn get_vm_state(&self, vm: &VmInfo) -> VmState {
        match self.rest.power_state(&vm.id).await {
            Ok(text) => parse_power_state(&text),
            Err(e) => {
                tracing::debug!(vm = %vm.name, "State query failed: {}", e);
                VmState::Unknown
            }
        }
    }

    async fn vm_exists(&self, vm: &VmInfo) -> FfuResult<bool> {
        match self.rest.power_state(&vm.id).await {
            Ok(_) => Ok(true),
            Err(FfuError::VmNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_vm_ip_address(&self, vm: &VmInfo) -> Option<String> {
        self.rest.ip(&vm.id).await.ok().flatten()
    }

    async fn new_virtual_disk(
        &self,
        path: &Path,
        size_bytes: u64,
        format: DiskFormat,
        disk_type: DiskType,
    ) -> FfuResult<PathBuf> {
        if format != DiskFormat::Vhd {
            return Err(FfuError::Provisioning(format!(
                "disk format {} is not supported by the workstation backend (supported: vhd)",
                format
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::info!(disk = %path.display(), size_bytes, ?disk_type, "Creating virtual disk");
        self.diskpart(diskpart::create_vdisk(path, size_bytes, disk_type))
            .await
            .map_err(|e| provisioning(e, "create vdisk"))?;
        Ok(path.to_path_buf())
    }

    async fn mount_virtual_disk(&self, path: &Path) -> FfuResult<MountHandle> {
        let out = self
            .diskpart(diskpart::attach_vdisk(path))
            .await
            .map_err(|e| provisioning(e, "attach vdisk"))?;

        let resolved = async {
            let disk_number = diskpart::parse_associated_disk(&out).ok_or_else(|| {
                FfuError::Provisioning(format!(
                    "attached {} but diskpart reported no disk number",
                    path.display()
                ))
            })?;
            let detail = self.diskpart(diskpart::detail_disk(disk_number)).await?;
            if diskpart::is_raw_disk(&detail) {
                tracing::info!(disk_number, "Initialising raw disk as GPT");
                self.diskpart(layout::gpt_init_script(disk_number))
                    .await
                    .map_err(|e| provisioning(e, "initialise disk"))?;
            }
            let letter =
                resolve_drive_letter(self, path, disk_number, &self.options.mount_retry).await?;
            Ok::<_, FfuError>((disk_number, letter))
        }
        .await;

        match resolved {
            Ok((disk_number, drive_letter)) => Ok(MountHandle {
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
        if !path.exists() {
            return Err(FfuError::NotFound(path.display().to_string()));
        }
        self.diskpart(diskpart::detach_vdisk(path))
            .await
            .map_err(|e| match e {
                FfuError::ExternalTool { ref detail, .. }
                    if detail.to_lowercase().contains("not attached") =>
                {
                    FfuError::NotFound(path.display().to_string())
                }
                other => other,
            })?;
        tracing::debug!(disk = %path.display(), "Virtual disk detached");
        Ok(())
    }

    async fn attach_iso(&self, vm: &VmInfo, iso_path: &Path) -> FfuResult<()> {
        self.set_iso(vm, Some(iso_path)).await?;
        tracing::info!(vm = %vm.name, iso = %iso_path.display(), "ISO attached");
        Ok(())
    }

    async fn detach_iso(&self, vm: &VmInfo) -> FfuResult<()> {
        self.set_iso(vm, None).await
    }
}

fn create(options: ProviderOptions) -> FfuResult<Arc<dyn HypervisorProvider>> {
    Ok(Arc::new(WorkstationProvider::new(options)?))
}

inventory::submit! {
    ProviderRegistration {
        kind: ProviderKind::Workstation,
        factory: create,
    }
}
