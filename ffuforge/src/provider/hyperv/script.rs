//! PowerShell snippets for the Hyper-V module.
//!
//! Every snippet sets `$ErrorActionPreference = 'Stop'` so cmdlet errors
//! surface as a nonzero exit with the message on stderr.

use crate::provider::{DiskType, VmConfiguration, VmGeneration};
use std::path::Path;

const STRICT: &str = "$ErrorActionPreference = 'Stop'; ";

/// Single-quote a PowerShell literal.
pub(super) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}

pub(super) fn service_status() -> String {
    format!("{STRICT}(Get-Service -Name vmms).Status.ToString()")
}

pub(super) fn new_vm(config: &VmConfiguration) -> String {
    let name = quote(&config.name);
    let mut script = format!(
        "{STRICT}$vm = New-VM -Name {name} -MemoryStartupBytes {memory} -Generation {generation} \
         -VHDPath {disk} -Path {dir}",
        memory = config.memory_bytes,
        generation = config.generation.number(),
        disk = quote_path(&config.disk_path),
        dir = quote_path(&config.vm_dir),
    );
    if let Some(switch) = &config.switch_name {
        script.push_str(&format!(" -SwitchName {}", quote(switch)));
    }
    script.push_str(&format!(
        "; Set-VMProcessor -VMName {name} -Count {}",
        config.processor_count
    ));
    script.push_str(&format!("; Set-VMMemory -VMName {name} -DynamicMemoryEnabled $false"));
    if config.tpm && config.generation == VmGeneration::Gen2 {
        script.push_str(&format!(
            "; Set-VMKeyProtector -VMName {name} -NewLocalKeyProtector; Enable-VMTPM -VMName {name}"
        ));
    }
    script.push_str(
        "; $vm | Select-Object @{n='Id';e={$_.VMId.Guid}}, Name, ConfigurationLocation \
         | ConvertTo-Json -Compress",
    );
    script
}

pub(super) fn start_vm(name: &str) -> String {
    format!("{STRICT}Start-VM -Name {}", quote(name))
}

/// `force` powers off without asking the guest.
pub(super) fn stop_vm(name: &str, force: bool) -> String {
    let mode = if force { " -TurnOff" } else { "" };
    format!("{STRICT}Stop-VM -Name {} -Force{mode}", quote(name))
}

pub(super) fn remove_vm(name: &str, remove_disks: bool) -> String {
    let name = quote(name);
    if remove_disks {
        format!(
            "{STRICT}$disks = @(Get-VMHardDiskDrive -VMName {name} | Select-Object -ExpandProperty Path); \
             Remove-VM -Name {name} -Force; \
             $disks | ForEach-Object {{ Remove-Item -LiteralPath $_ -Force -ErrorAction SilentlyContinue }}"
        )
    } else {
        format!("{STRICT}Remove-VM -Name {name} -Force")
    }
}

pub(super) fn vm_state(name: &str) -> String {
    format!("{STRICT}(Get-VM -Name {}).State.ToString()", quote(name))
}

/// First IPv4 address reported by integration services.
pub(super) fn vm_ip(name: &str) -> String {
    format!(
        "{STRICT}(Get-VMNetworkAdapter -VMName {}).IPAddresses \
         | Where-Object {{ $_ -match '^\\d+\\.\\d+\\.\\d+\\.\\d+$' }} | Select-Object -First 1",
        quote(name)
    )
}

pub(super) fn new_vhd(path: &Path, size_bytes: u64, disk_type: DiskType) -> String {
    let kind = match disk_type {
        DiskType::Dynamic => "-Dynamic",
        DiskType::Fixed => "-Fixed",
    };
    format!(
        "{STRICT}New-VHD -Path {} -SizeBytes {size_bytes} {kind} | Out-Null",
        quote_path(path)
    )
}

/// Attach to the host and print the disk number.
pub(super) fn mount_vhd(path: &Path) -> String {
    format!(
        "{STRICT}(Mount-VHD -Path {} -Passthru -NoDriveLetter | Get-Disk).Number",
        quote_path(path)
    )
}

pub(super) fn dismount_vhd(path: &Path) -> String {
    format!("{STRICT}Dismount-VHD -Path {}", quote_path(path))
}

pub(super) fn partition_style(disk_number: u32) -> String {
    format!("{STRICT}(Get-Disk -Number {disk_number}).PartitionStyle.ToString()")
}

fn os_partition(disk_number: u32) -> String {
    format!(
        "Get-Partition -DiskNumber {disk_number} | Where-Object {{ $_.Type -eq 'Basic' }} \
         | Select-Object -Last 1"
    )
}

pub(super) fn os_partition_letter(disk_number: u32) -> String {
    format!(
        "{STRICT}$p = {}; if ($p -and $p.DriveLetter -match '[A-Za-z]') {{ $p.DriveLetter }}",
        os_partition(disk_number)
    )
}

pub(super) fn assign_letter(disk_number: u32, letter: char) -> String {
    format!(
        "{STRICT}{} | Set-Partition -NewDriveLetter {letter}",
        os_partition(disk_number)
    )
}

pub(super) fn used_letters() -> String {
    format!("{STRICT}(Get-PSDrive -PSProvider FileSystem).Name -join ','")
}

/// Insert the ISO and make it the first boot device on UEFI VMs.
pub(super) fn attach_iso(name: &str, iso: &Path) -> String {
    let name = quote(name);
    format!(
        "{STRICT}Add-VMDvdDrive -VMName {name} -Path {iso}; \
         if ((Get-VM -Name {name}).Generation -eq 2) {{ \
         Set-VMFirmware -VMName {name} -FirstBootDevice (Get-VMDvdDrive -VMName {name} | Select-Object -First 1) }}",
        iso = quote_path(iso)
    )
}

pub(super) fn detach_iso(name: &str) -> String {
    format!("{STRICT}Get-VMDvdDrive -VMName {} | Remove-VMDvdDrive", quote(name))
}
