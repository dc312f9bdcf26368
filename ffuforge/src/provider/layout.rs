//! GPT layout applied to a freshly created build disk.
//!
//! A new virtual disk comes up raw. Before the base image can be applied it
//! needs the standard UEFI layout: EFI system partition, MSR, and the OS
//! partition that receives the drive letter.

/// EFI system partition size in MiB.
pub const EFI_PARTITION_MB: u64 = 260;

/// Microsoft reserved partition size in MiB.
pub const MSR_PARTITION_MB: u64 = 16;

/// Index of the OS partition in the layout (EFI, MSR, OS).
pub const OS_PARTITION_NUMBER: u32 = 3;

/// Volume label given to the OS partition.
pub const OS_VOLUME_LABEL: &str = "Windows";

/// Diskpart script that initialises `disk_number` as GPT.
///
/// The OS partition takes the rest of the disk and is left without a
/// letter; [`crate::provider::mount::resolve_drive_letter`] assigns one.
pub fn gpt_init_script(disk_number: u32) -> String {
    format!(
        "select disk {disk}\n\
         clean\n\
         convert gpt\n\
         create partition efi size={efi}\n\
         format quick fs=fat32 label=\"System\"\n\
         create partition msr size={msr}\n\
         create partition primary\n\
         format quick fs=ntfs label=\"{label}\"\n\
         exit\n",
        disk = disk_number,
        efi = EFI_PARTITION_MB,
        msr = MSR_PARTITION_MB,
        label = OS_VOLUME_LABEL,
    )
}

/// PowerShell equivalent of [`gpt_init_script`] using the Storage module.
pub fn gpt_init_powershell(disk_number: u32) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         Initialize-Disk -Number {disk} -PartitionStyle GPT; \
         New-Partition -DiskNumber {disk} -Size {efi}MB -GptType '{{c12a7328-f81f-11d2-ba4b-00a0c93ec93b}}' | \
         Format-Volume -FileSystem FAT32 -NewFileSystemLabel 'System' -Confirm:$false | Out-Null; \
         New-Partition -DiskNumber {disk} -Size {msr}MB -GptType '{{e3c9e316-0b5c-4db8-817d-f92df00215ae}}' | Out-Null; \
         New-Partition -DiskNumber {disk} -UseMaximumSize | \
         Format-Volume -FileSystem NTFS -NewFileSystemLabel '{label}' -Confirm:$false | Out-Null",
        disk = disk_number,
        efi = EFI_PARTITION_MB,
        msr = MSR_PARTITION_MB,
        label = OS_VOLUME_LABEL,
    )
}
