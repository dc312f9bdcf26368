//! Uniform capability set implemented by every hypervisor backend.

use super::validation::{ProviderCapabilities, ValidationReport, validate_against};
use super::{DiskFormat, DiskType, MountHandle, ProviderKind, VmConfiguration, VmInfo, VmState};
use async_trait::async_trait;
use ffuforge_shared::errors::FfuResult;
use std::path::{Path, PathBuf};

/// Backend-specific VM and virtual disk operations.
///
/// Implementations must be safe to share behind an `Arc` and hold no
/// mutable state that outlives a single call.
///
/// Error contract:
/// - `create_vm` fails with `Provisioning` when the configuration is invalid
///   for this backend or the platform runs out of resources
/// - lifecycle calls fail with `VmNotFound` when the VM disappeared and
///   `OperationTimeout` when the platform does not answer in time
/// - `get_vm_state` and `get_vm_ip_address` never fail
/// - `vm_exists` answers `Ok(false)` only when the platform confirms the VM
///   is gone; any other failure is an error
#[async_trait]
pub trait HypervisorProvider: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> ProviderKind;

    /// Static limits and feature support of this backend.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Check that the hypervisor platform is installed and running.
    ///
    /// Must be called before any other operation.
    async fn test_available(&self) -> bool;

    /// Validate a VM request against this backend's capabilities.
    ///
    /// Pure: no platform calls, no side effects.
    fn validate_configuration(&self, config: &VmConfiguration) -> ValidationReport {
        validate_against(&self.capabilities(), config)
    }

    /// Create (but do not start) a VM.
    async fn create_vm(&self, config: &VmConfiguration) -> FfuResult<VmInfo>;

    /// Power on the VM, optionally opening its console window.
    async fn start_vm(&self, vm: &mut VmInfo, show_console: bool) -> FfuResult<()>;

    /// Power off the VM; `force` skips the guest shutdown request.
    async fn stop_vm(&self, vm: &mut VmInfo, force: bool) -> FfuResult<()>;

    /// Delete the VM, and its disks when `remove_disks` is set.
    async fn remove_vm(&self, vm: &VmInfo, remove_disks: bool) -> FfuResult<()>;

    /// Best-effort state query; `Unknown` when the platform cannot tell.
    async fn get_vm_state(&self, vm: &VmInfo) -> VmState;

    /// Authoritative existence check, used when state queries stop answering.
    async fn vm_exists(&self, vm: &VmInfo) -> FfuResult<bool>;

    /// Best-effort guest address; `None` until a guest OS reports one.
    async fn get_vm_ip_address(&self, vm: &VmInfo) -> Option<String>;

    /// Create a virtual disk file and return its path.
    async fn new_virtual_disk(
        &self,
        path: &Path,
        size_bytes: u64,
        format: DiskFormat,
        disk_type: DiskType,
    ) -> FfuResult<PathBuf>;

    /// Attach a virtual disk to the host and resolve a usable drive letter.
    ///
    /// Never returns a handle without a letter.
    async fn mount_virtual_disk(&self, path: &Path) -> FfuResult<MountHandle>;

    /// Detach a virtual disk from the host.
    async fn dismount_virtual_disk(&self, path: &Path) -> FfuResult<()>;

    /// Insert an ISO into the VM's optical drive.
    async fn attach_iso(&self, vm: &VmInfo, iso_path: &Path) -> FfuResult<()>;

    /// Remove any ISO from the VM's optical drive.
    async fn detach_iso(&self, vm: &VmInfo) -> FfuResult<()>;

    /// Refresh state and addresses of `vm` from the platform.
    async fn refresh_vm(&self, vm: &mut VmInfo) {
        vm.state = self.get_vm_state(vm).await;
        vm.ip_addresses = self.get_vm_ip_address(vm).await.into_iter().collect();
    }
}
