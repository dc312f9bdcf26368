//! Build configuration.
//!
//! A [`BuildConfig`] is loaded once, validated, wrapped in `Arc` and handed
//! to the orchestrator, providers and steps. Nothing reads configuration
//! from globals.

use crate::imaging::layout::RECOVERY_MARGIN_BYTES;
use crate::provider::{
    DiskFormat, ProviderKind, ProviderOptions, RetryPolicy, VmConfiguration, VmGeneration,
};
use ffuforge_shared::constants::envs as const_envs;
use ffuforge_shared::constants::memory::GIB;
use ffuforge_shared::errors::{FfuError, FfuResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the user's home used when `FFUFORGE_HOME` is not set.
pub const FFUFORGE_DIR: &str = ".ffuforge";

/// Control-plane settings for the workstation hypervisor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstationSettings {
    /// Base URL of the local `vmrest` service.
    #[serde(default = "default_rest_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Path to `vmrun`; looked up on `PATH` when unset.
    #[serde(default)]
    pub vmrun_path: Option<PathBuf>,
}

fn default_rest_endpoint() -> String {
    "http://127.0.0.1:8697/api".to_string()
}

impl Default for WorkstationSettings {
    fn default() -> Self {
        Self {
            endpoint: default_rest_endpoint(),
            username: None,
            password: None,
            vmrun_path: None,
        }
    }
}

impl WorkstationSettings {
    pub fn vmrun(&self) -> PathBuf {
        self.vmrun_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("vmrun.exe"))
    }
}

/// Everything one build needs to know.
///
/// Every field has a default so a config file only names what differs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub provider: ProviderKind,

    /// Scratch directory holding the VM, disk and lock file.
    pub work_dir: PathBuf,
    /// Build disk location; `<work_dir>/<vm_name>.<ext>` when unset.
    pub disk_path: Option<PathBuf>,
    /// Final FFU location; `<work_dir>/<vm_name>.ffu` when unset.
    pub output_path: Option<PathBuf>,
    /// WIM/ESD applied to the build disk.
    pub base_image: Option<PathBuf>,
    /// Index inside `base_image`.
    pub image_index: u32,
    /// Application install media; enables the install-then-capture path.
    pub apps_iso: Option<PathBuf>,
    /// WinPE capture media booted after installation.
    pub capture_iso: Option<PathBuf>,
    /// Drivers injected after capture.
    pub drivers_dir: Option<PathBuf>,

    pub vm_name: String,
    pub memory_bytes: u64,
    pub processor_count: u32,
    pub disk_size_bytes: u64,
    pub disk_format: DiskFormat,
    pub generation: VmGeneration,
    pub tpm: bool,
    pub switch_name: Option<String>,

    /// Bound for one platform call, in seconds.
    pub command_timeout_secs: u64,
    /// Bound for the guest to reach `Running` after start.
    pub vm_start_timeout_secs: u64,
    /// Bound for the guest workload to power the VM off.
    pub vm_shutdown_timeout_secs: u64,
    /// Bound for one imaging tool run (apply, capture, optimize).
    pub imaging_timeout_secs: u64,
    pub state_poll_interval_ms: u64,
    /// How long the controller waits for the worker after cancelling.
    pub cancel_grace_period_secs: u64,

    pub mount_retry: RetryPolicy,
    pub workstation: WorkstationSettings,

    /// Keep the build disk after a successful build.
    pub keep_disk: bool,
    /// Run `/Optimize-FFU` during packaging.
    pub optimize: bool,
    pub show_console: bool,
    pub recovery_margin_bytes: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::HyperV,
            work_dir: default_work_dir(),
            disk_path: None,
            output_path: None,
            base_image: None,
            image_index: 1,
            apps_iso: None,
            capture_iso: None,
            drivers_dir: None,
            vm_name: "_FFU-Build".to_string(),
            memory_bytes: 8 * GIB,
            processor_count: 4,
            disk_size_bytes: 64 * GIB,
            disk_format: DiskFormat::Vhdx,
            generation: VmGeneration::Gen2,
            tpm: true,
            switch_name: None,
            command_timeout_secs: 300,
            vm_start_timeout_secs: 120,
            vm_shutdown_timeout_secs: 4 * 60 * 60,
            imaging_timeout_secs: 2 * 60 * 60,
            state_poll_interval_ms: 5_000,
            cancel_grace_period_secs: 30,
            mount_retry: RetryPolicy::default(),
            workstation: WorkstationSettings::default(),
            keep_disk: false,
            optimize: true,
            show_console: false,
            recovery_margin_bytes: RECOVERY_MARGIN_BYTES,
        }
    }
}

/// `FFUFORGE_HOME`, else `~/.ffuforge`.
pub fn default_work_dir() -> PathBuf {
    std::env::var(const_envs::FFUFORGE_HOME)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(FFUFORGE_DIR);
            path
        })
}

impl BuildConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> FfuResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FfuError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| FfuError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Check that paths are present and consistent.
    ///
    /// VM shape (memory, processors, format) is checked separately against
    /// the selected provider's capabilities.
    pub fn validate(&self) -> FfuResult<()> {
        let mut problems = Vec::new();

        if self.vm_name.trim().is_empty() {
            problems.push("vm_name must not be empty".to_string());
        }
        match &self.base_image {
            None => problems.push("base_image is required".to_string()),
            Some(path) if !path.exists() => {
                problems.push(format!("base_image {} does not exist", path.display()))
            }
            Some(_) => {}
        }
        if let Some(iso) = &self.apps_iso {
            if !iso.exists() {
                problems.push(format!("apps_iso {} does not exist", iso.display()));
            }
            match &self.capture_iso {
                None => problems.push("capture_iso is required when apps_iso is set".to_string()),
                Some(capture) if !capture.exists() => {
                    problems.push(format!("capture_iso {} does not exist", capture.display()))
                }
                Some(_) => {}
            }
        }
        if let Some(dir) = &self.drivers_dir
            && !dir.is_dir()
        {
            problems.push(format!("drivers_dir {} is not a directory", dir.display()));
        }
        if self.disk_size_bytes <= self.recovery_margin_bytes {
            problems.push("disk_size_bytes must exceed recovery_margin_bytes".to_string());
        }
        if self.state_poll_interval_ms == 0 {
            problems.push("state_poll_interval_ms must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FfuError::Config(problems.join("; ")))
        }
    }

    /// True when applications are installed inside the VM before capture.
    pub fn install_apps(&self) -> bool {
        self.apps_iso.is_some()
    }

    pub fn resolved_disk_path(&self) -> PathBuf {
        self.disk_path.clone().unwrap_or_else(|| {
            self.work_dir
                .join(format!("{}.{}", self.vm_name, self.disk_format.extension()))
        })
    }

    pub fn resolved_output_path(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| self.work_dir.join(format!("{}.ffu", self.vm_name)))
    }

    /// Directory holding the VM's own files.
    pub fn vm_dir(&self) -> PathBuf {
        self.work_dir.join("vm").join(&self.vm_name)
    }

    pub fn vm_configuration(&self) -> VmConfiguration {
        VmConfiguration {
            name: self.vm_name.clone(),
            memory_bytes: self.memory_bytes,
            processor_count: self.processor_count,
            disk_format: self.disk_format,
            disk_path: self.resolved_disk_path(),
            generation: self.generation,
            tpm: self.tpm,
            switch_name: self.switch_name.clone(),
            vm_dir: self.vm_dir(),
        }
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            command_timeout: self.command_timeout(),
            mount_retry: self.mount_retry,
            workstation: self.workstation.clone(),
            ..ProviderOptions::default()
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn vm_start_timeout(&self) -> Duration {
        Duration::from_secs(self.vm_start_timeout_secs)
    }

    pub fn vm_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.vm_shutdown_timeout_secs)
    }

    pub fn imaging_timeout(&self) -> Duration {
        Duration::from_secs(self.imaging_timeout_secs)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_interval_ms)
    }

    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_period_secs)
    }
}
