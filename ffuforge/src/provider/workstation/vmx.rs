//! `.vmx` descriptor rendering.
//!
//! The descriptor is a flat `key = "value"` file. It is written once at
//! creation and edited in place for optical media changes while the VM is
//! powered off.

use crate::provider::{VmConfiguration, VmGeneration};
use std::path::Path;

const CDROM_PREFIX: &str = "sata0:1.";

fn entry(key: &str, value: impl std::fmt::Display) -> String {
    format!("{key} = \"{value}\"\n")
}

/// Render a fresh descriptor for `config`.
pub(super) fn render(config: &VmConfiguration) -> String {
    let memory_mb = config.memory_bytes / (1024 * 1024);
    let mut out = String::from(".encoding = \"UTF-8\"\n");
    out.push_str(&entry("config.version", 8));
    out.push_str(&entry("virtualHW.version", 19));
    out.push_str(&entry("displayName", &config.name));
    out.push_str(&entry("guestOS", "windows11-64"));
    out.push_str(&entry("memsize", memory_mb));
    out.push_str(&entry("numvcpus", config.processor_count));
    if config.generation == VmGeneration::Gen2 {
        out.push_str(&entry("firmware", "efi"));
        out.push_str(&entry("uefi.secureBoot.enabled", "TRUE"));
    }
    if config.tpm && config.generation == VmGeneration::Gen2 {
        out.push_str(&entry("managedVM.autoAddVTPM", "software"));
    }
    out.push_str(&entry("nvme0.present", "TRUE"));
    out.push_str(&entry("nvme0:0.present", "TRUE"));
    out.push_str(&entry("nvme0:0.fileName", config.disk_path.display()));
    out.push_str(&entry("sata0.present", "TRUE"));
    match &config.switch_name {
        Some(network) => {
            out.push_str(&entry("ethernet0.present", "TRUE"));
            out.push_str(&entry("ethernet0.connectionType", "custom"));
            out.push_str(&entry("ethernet0.vnet", network));
            out.push_str(&entry("ethernet0.virtualDev", "e1000e"));
        }
        None => out.push_str(&entry("ethernet0.present", "FALSE")),
    }
    out
}

/// Replace the optical drive entries: insert `iso`, or remove the drive.
pub(super) fn with_iso(vmx: &str, iso: Option<&Path>) -> String {
    let mut out: String = vmx
        .lines()
        .filter(|line| !line.trim_start().starts_with(CDROM_PREFIX))
        .map(|line| format!("{line}\n"))
        .collect();
    if let Some(iso) = iso {
        out.push_str(&entry("sata0:1.present", "TRUE"));
        out.push_str(&entry("sata0:1.deviceType", "cdrom-image"));
        out.push_str(&entry("sata0:1.fileName", iso.display()));
        out.push_str(&entry("sata0:1.startConnected", "TRUE"));
    }
    out
}

/// Read a value from a descriptor.
pub(super) fn get<'a>(vmx: &'a str, key: &str) -> Option<&'a str> {
    vmx.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"'))
    })
}
