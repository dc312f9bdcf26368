//! Recovery partition carve-out on the applied OS volume.
//!
//! After the base image is applied the OS partition is shrunk by
//! [`RECOVERY_MARGIN_BYTES`] and a hidden recovery partition takes the
//! freed space, so WinRE can be serviced on deployed devices.

use ffuforge_shared::constants::memory::GIB;

/// Space reserved at the end of the build disk for the recovery partition.
pub const RECOVERY_MARGIN_BYTES: u64 = GIB;

/// GPT type of a Windows recovery partition.
pub const RECOVERY_GPT_TYPE: &str = "{de94bba4-06d1-4d40-a16a-bfd50179d6ac}";

/// GPT type of the EFI system partition.
pub const ESP_GPT_TYPE: &str = "{c12a7328-f81f-11d2-ba4b-00a0c93ec93b}";

/// Required + no-automount attributes for the recovery partition.
pub const RECOVERY_GPT_ATTRIBUTES: &str = "0x8000000000000001";

/// PowerShell script that shrinks the OS partition on `disk_number` by
/// `margin_bytes` and creates the recovery partition behind it.
pub fn recovery_partition_script(disk_number: u32, os_letter: char, margin_bytes: u64) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         $os = Get-Partition -DriveLetter {letter}; \
         Resize-Partition -DriveLetter {letter} -Size ($os.Size - {margin}); \
         $r = New-Partition -DiskNumber {disk} -UseMaximumSize -GptType '{gpt}'; \
         $r | Format-Volume -FileSystem NTFS -NewFileSystemLabel 'Recovery' -Confirm:$false | Out-Null; \
         $r | Set-Partition -NoDefaultDriveLetter $true; \
         \"select disk {disk}`nselect partition $($r.PartitionNumber)`ngpt attributes={attrs}`nexit\" | diskpart.exe | Out-Null",
        letter = os_letter,
        margin = margin_bytes,
        disk = disk_number,
        gpt = RECOVERY_GPT_TYPE,
        attrs = RECOVERY_GPT_ATTRIBUTES,
    )
}

/// PowerShell script that writes UEFI boot files for `os_letter` to the
/// disk's EFI system partition, lettering it only for the duration.
pub fn boot_files_script(disk_number: u32, os_letter: char) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         $esp = Get-Partition -DiskNumber {disk} | Where-Object GptType -eq '{esp}'; \
         $esp | Add-PartitionAccessPath -AssignDriveLetter; \
         $esp = Get-Partition -DiskNumber {disk} -PartitionNumber $esp.PartitionNumber; \
         $s = \"$($esp.DriveLetter):\"; \
         try {{ bcdboot.exe {letter}:\\Windows /s $s /f UEFI; if ($LASTEXITCODE -ne 0) {{ throw \"bcdboot exited $LASTEXITCODE\" }} }} \
         finally {{ $esp | Remove-PartitionAccessPath -AccessPath \"$s\\\" }}",
        disk = disk_number,
        esp = ESP_GPT_TYPE,
        letter = os_letter,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_is_one_gib() {
        assert_eq!(RECOVERY_MARGIN_BYTES, 1_073_741_824);
    }

    #[test]
    fn test_recovery_script_shrinks_by_margin() {
        let script = recovery_partition_script(3, 'W', RECOVERY_MARGIN_BYTES);
        assert!(script.contains("Resize-Partition -DriveLetter W -Size ($os.Size - 1073741824)"));
        assert!(script.contains("New-Partition -DiskNumber 3 -UseMaximumSize"));
        assert!(script.contains(RECOVERY_GPT_TYPE));
        assert!(script.contains("gpt attributes=0x8000000000000001"));
    }

    #[test]
    fn test_boot_files_script_releases_esp_letter() {
        let script = boot_files_script(2, 'W');
        assert!(script.contains("bcdboot.exe W:\\Windows /s $s /f UEFI"));
        assert!(script.contains("finally"));
        assert!(script.contains("Remove-PartitionAccessPath"));
    }
}
