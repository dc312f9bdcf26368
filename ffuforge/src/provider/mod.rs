//! Hypervisor provider abstraction.
//!
//! Every build phase talks to the hypervisor only through
//! [`HypervisorProvider`]; adding a backend means adding a module that
//! registers a factory with [`registry`], nothing in the orchestrator changes.

use ffuforge_shared::errors::FfuError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod host_check;
#[cfg(feature = "hyperv")]
pub mod hyperv;
pub mod interface;
pub mod layout;
pub mod mount;
pub mod registry;
pub mod validation;
pub mod vm;
#[cfg(feature = "workstation")]
pub mod workstation;

pub use interface::HypervisorProvider;
pub use mount::{MountHandle, RetryPolicy, VolumeOps};
pub use registry::{create_provider, select_provider};
pub use validation::{ProviderCapabilities, ValidationReport};
pub use vm::{VmInfo, VmState};

use crate::config::WorkstationSettings;
use crate::tools::{CommandRunner, SystemRunner};

/// Available hypervisor backends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    HyperV,
    Workstation,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::HyperV => "hyperv",
            ProviderKind::Workstation => "workstation",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = FfuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hyperv" | "hyper-v" => Ok(ProviderKind::HyperV),
            "workstation" | "vmware" => Ok(ProviderKind::Workstation),
            _ => Err(FfuError::Config(format!(
                "Unknown provider: '{}'. Supported: hyperv, workstation",
                s
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Virtual disk file format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Vhdx,
    Vhd,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Vhdx => "vhdx",
            DiskFormat::Vhd => "vhd",
        }
    }

    /// File extension used when the caller does not pick a disk path.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocation strategy for a new virtual disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    /// Sparse, grows as written.
    #[default]
    Dynamic,
    /// Fully allocated up front.
    Fixed,
}

/// VM firmware generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum VmGeneration {
    /// BIOS firmware.
    #[serde(rename = "1")]
    Gen1,
    /// UEFI firmware (required for TPM and secure boot).
    #[default]
    #[serde(rename = "2")]
    Gen2,
}

impl VmGeneration {
    pub fn number(&self) -> u8 {
        match self {
            VmGeneration::Gen1 => 1,
            VmGeneration::Gen2 => 2,
        }
    }
}

/// Immutable request for VM creation.
///
/// Checked by [`HypervisorProvider::validate_configuration`] before
/// [`HypervisorProvider::create_vm`] is ever called.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmConfiguration {
    pub name: String,
    pub memory_bytes: u64,
    pub processor_count: u32,
    pub disk_format: DiskFormat,
    pub disk_path: PathBuf,
    pub generation: VmGeneration,
    pub tpm: bool,
    /// Virtual switch / network to connect; `None` leaves the VM offline.
    pub switch_name: Option<String>,
    /// Directory holding the VM's configuration files.
    pub vm_dir: PathBuf,
}

/// Options handed to provider factories.
///
/// Derived once from [`crate::config::BuildConfig::provider_options`].
#[derive(Clone)]
pub struct ProviderOptions {
    /// Bound for a single platform call.
    pub command_timeout: Duration,
    /// Retry policy for drive-letter resolution after mount.
    pub mount_retry: RetryPolicy,
    /// Control-plane settings for the workstation backend.
    pub workstation: WorkstationSettings,
    /// Runs platform CLIs (PowerShell, diskpart, vmrun).
    pub runner: Arc<dyn CommandRunner>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            mount_retry: RetryPolicy::default(),
            workstation: WorkstationSettings::default(),
            runner: Arc::new(SystemRunner::new()),
        }
    }
}

impl ProviderOptions {
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("command_timeout", &self.command_timeout)
            .field("mount_retry", &self.mount_retry)
            .field("workstation", &self.workstation)
            .finish_non_exhaustive()
    }
}
