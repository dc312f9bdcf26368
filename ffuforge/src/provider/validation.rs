//! Configuration validation against provider capabilities.

use super::{DiskFormat, VmConfiguration, VmGeneration};
use ffuforge_shared::constants::memory::{GIB, MIN_MEMORY_BYTES};
use ffuforge_shared::errors::FfuError;
use serde::{Deserialize, Serialize};

/// Static limits and feature support of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supported_formats: Vec<DiskFormat>,
    pub min_memory_bytes: u64,
    pub max_memory_bytes: u64,
    pub max_processors: u32,
    pub supports_gen2: bool,
    pub supports_tpm: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supported_formats: vec![DiskFormat::Vhdx, DiskFormat::Vhd],
            min_memory_bytes: MIN_MEMORY_BYTES,
            max_memory_bytes: 1024 * GIB,
            max_processors: 64,
            supports_gen2: true,
            supports_tpm: true,
        }
    }
}

/// Outcome of [`validate_against`].
///
/// Errors block VM creation; warnings are reported and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a result, joining all errors into one `Validation` error.
    pub fn into_result(self) -> Result<Vec<String>, FfuError> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(FfuError::Validation(self.errors.join("; ")))
        }
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Check `config` against `caps`.
pub fn validate_against(caps: &ProviderCapabilities, config: &VmConfiguration) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.name.trim().is_empty() {
        report.errors.push("VM name must not be empty".to_string());
    }

    let min_memory = caps.min_memory_bytes.max(MIN_MEMORY_BYTES);
    if config.memory_bytes < min_memory {
        report.errors.push(format!(
            "memory {:.1} GiB is below the minimum of {:.1} GiB",
            gib(config.memory_bytes),
            gib(min_memory)
        ));
    } else if config.memory_bytes > caps.max_memory_bytes {
        report.errors.push(format!(
            "memory {:.1} GiB exceeds the maximum of {:.1} GiB",
            gib(config.memory_bytes),
            gib(caps.max_memory_bytes)
        ));
    }

    if config.processor_count == 0 {
        report
            .errors
            .push("processor count must be at least 1".to_string());
    } else if config.processor_count > caps.max_processors {
        report.errors.push(format!(
            "processor count {} exceeds the maximum of {}",
            config.processor_count, caps.max_processors
        ));
    }

    if !caps.supported_formats.contains(&config.disk_format) {
        let supported: Vec<_> = caps.supported_formats.iter().map(|f| f.as_str()).collect();
        report.errors.push(format!(
            "disk format {} is not supported (supported: {})",
            config.disk_format,
            supported.join(", ")
        ));
    }

    if config.generation == VmGeneration::Gen2 && !caps.supports_gen2 {
        report
            .errors
            .push("generation 2 (UEFI) VMs are not supported".to_string());
    }

    if config.tpm {
        if !caps.supports_tpm {
            report
                .warnings
                .push("TPM requested but not supported; VM will be created without TPM".to_string());
        } else if config.generation == VmGeneration::Gen1 {
            report
                .warnings
                .push("TPM requires a generation 2 VM; TPM will not be enabled".to_string());
        }
    }

    report
}
