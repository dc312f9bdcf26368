use crate::{Behaviour, Journal};
use async_trait::async_trait;
use chrono::Utc;
use ffuforge::provider::{
    DiskFormat, DiskType, HypervisorProvider, MountHandle, ProviderCapabilities, ProviderKind,
    VmConfiguration, VmInfo, VmState,
};
use ffuforge_shared::errors::{FfuError, FfuResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// In-memory hypervisor.
///
/// Virtual disks are real (empty) files so teardown through the
/// filesystem is observable. A started VM reports `Running` for
/// `running_polls` state queries, then `Off`.
pub struct FakeProvider {
    journal: Journal,
    behaviour: Behaviour,
    kind: ProviderKind,
    capabilities: ProviderCapabilities,
    available: bool,
    running_polls: u32,
    lose_running_vm: bool,
    vms: Mutex<HashMap<String, u32>>,
    mounted: Mutex<HashSet<PathBuf>>,
    next_disk: Mutex<u32>,
}

impl FakeProvider {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            behaviour: Behaviour::default(),
            kind: ProviderKind::HyperV,
            capabilities: ProviderCapabilities::default(),
            available: true,
            running_polls: 1,
            lose_running_vm: false,
            vms: Mutex::new(HashMap::new()),
            mounted: Mutex::new(HashSet::new()),
            next_disk: Mutex::new(2),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// State queries answered with `Running` after each start.
    pub fn with_running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// The VM is deleted behind the build's back on its first running poll.
    pub fn losing_running_vm(mut self) -> Self {
        self.lose_running_vm = true;
        self
    }

    pub fn behaviour(&self) -> &Behaviour {
        &self.behaviour
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn vm_exists(&self, name: &str) -> bool {
        self.vms.lock().contains_key(name)
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.mounted.lock().contains(path)
    }

    async fn enter(&self, op: &str, target: &str) -> FfuResult<()> {
        self.journal.record(format!("{op} {target}"));
        self.behaviour.enter(op).await
    }
}

#[async_trait]
impl HypervisorProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn test_available(&self) -> bool {
        self.journal.record("test_available");
        self.available
    }

    async fn create_vm(&self, config: &VmConfiguration) -> FfuResult<VmInfo> {
        self.enter("create_vm", &config.name).await?;
        self.vms.lock().insert(config.name.clone(), 0);
        Ok(VmInfo {
            id: format!("fake-{}", config.name),
            name: config.name.clone(),
            hypervisor: self.kind,
            state: VmState::Off,
            memory_bytes: config.memory_bytes,
            ip_addresses: Vec::new(),
            config_path: None,
            disk_path: config.disk_path.clone(),
            created_at: Utc::now(),
        })
    }

    async fn start_vm(&self, vm: &mut VmInfo, _show_console: bool) -> FfuResult<()> {
        self.enter("start_vm", &vm.name).await?;
        match self.vms.lock().get_mut(&vm.name) {
            Some(polls) => *polls = self.running_polls,
            None => return Err(FfuError::VmNotFound(vm.name.clone())),
        }
        vm.state = VmState::Running;
        Ok(())
    }

    async fn stop_vm(&self, vm: &mut VmInfo, _force: bool) -> FfuResult<()> {
        self.enter("stop_vm", &vm.name).await?;
        match self.vms.lock().get_mut(&vm.name) {
            Some(polls) => *polls = 0,
            None => return Err(FfuError::VmNotFound(vm.name.clone())),
        }
        vm.state = VmState::Off;
        Ok(())
    }

    async fn remove_vm(&self, vm: &VmInfo, _remove_disks: bool) -> FfuResult<()> {
        self.enter("remove_vm", &vm.name).await?;
        match self.vms.lock().remove(&vm.name) {
            Some(_) => Ok(()),
            None => Err(FfuError::VmNotFound(vm.name.clone())),
        }
    }

    async fn get_vm_state(&self, vm: &VmInfo) -> VmState {
        let mut vms = self.vms.lock();
        let running = vms.get(&vm.name).is_some_and(|polls| *polls > 0);
        if running && self.lose_running_vm {
            vms.remove(&vm.name);
            return VmState::Unknown;
        }
        match vms.get_mut(&vm.name) {
            Some(polls) if *polls > 0 => {
                *polls -= 1;
                VmState::Running
            }
            Some(_) => VmState::Off,
            None => VmState::Unknown,
        }
    }

    async fn vm_exists(&self, vm: &VmInfo) -> FfuResult<bool> {
        self.enter("vm_exists", &vm.name).await?;
        Ok(self.vm_exists(&vm.name))
    }

    async fn get_vm_ip_address(&self, vm: &VmInfo) -> Option<String> {
        self.vms
            .lock()
            .get(&vm.name)
            .filter(|polls| **polls > 0)
            .map(|_| "172.20.0.10".to_string())
    }

    async fn new_virtual_disk(
        &self,
        path: &Path,
        _size_bytes: u64,
        _format: DiskFormat,
        _disk_type: DiskType,
    ) -> FfuResult<PathBuf> {
        self.enter("new_virtual_disk", &path.display().to_string()).await?;
        std::fs::write(path, b"")
            .map_err(|e| FfuError::Provisioning(format!("fake disk: {e}")))?;
        Ok(path.to_path_buf())
    }

    async fn mount_virtual_disk(&self, path: &Path) -> FfuResult<MountHandle> {
        self.enter("mount_virtual_disk", &path.display().to_string()).await?;
        self.mounted.lock().insert(path.to_path_buf());
        let mut next = self.next_disk.lock();
        *next += 1;
        Ok(MountHandle {
            disk_path: path.to_path_buf(),
            disk_number: *next,
            drive_letter: 'W',
        })
    }

    async fn dismount_virtual_disk(&self, path: &Path) -> FfuResult<()> {
        self.enter("dismount_virtual_disk", &path.display().to_string()).await?;
        if self.mounted.lock().remove(path) {
            Ok(())
        } else {
            Err(FfuError::NotFound(path.display().to_string()))
        }
    }

    async fn attach_iso(&self, vm: &VmInfo, iso_path: &Path) -> FfuResult<()> {
        self.enter("attach_iso", &iso_path.display().to_string()).await?;
        if self.vm_exists(&vm.name) {
            Ok(())
        } else {
            Err(FfuError::VmNotFound(vm.name.clone()))
        }
    }

    async fn detach_iso(&self, vm: &VmInfo) -> FfuResult<()> {
        self.enter("detach_iso", &vm.name).await?;
        if self.vm_exists(&vm.name) {
            Ok(())
        } else {
            Err(FfuError::VmNotFound(vm.name.clone()))
        }
    }
}
