//! Virtual disk handling through diskpart.
//!
//! The workstation hypervisor has no host-side disk cmdlets, so VHD files
//! are created and attached with diskpart scripts fed on stdin, and its
//! text output is parsed for disk numbers and volume letters.

use crate::provider::DiskType;
use crate::provider::layout::{OS_PARTITION_NUMBER, OS_VOLUME_LABEL};
use std::path::Path;

pub(super) const TOOL: &str = "diskpart";

const MIB: u64 = 1024 * 1024;

fn select_vdisk(path: &Path) -> String {
    format!("select vdisk file=\"{}\"\n", path.display())
}

pub(super) fn create_vdisk(path: &Path, size_bytes: u64, disk_type: DiskType) -> String {
    let kind = match disk_type {
        DiskType::Dynamic => "expandable",
        DiskType::Fixed => "fixed",
    };
    format!(
        "create vdisk file=\"{}\" maximum={} type={}\nexit\n",
        path.display(),
        size_bytes.div_ceil(MIB),
        kind
    )
}

/// Attach and print the vdisk details (including its disk number).
pub(super) fn attach_vdisk(path: &Path) -> String {
    let select = select_vdisk(path);
    format!("{select}attach vdisk\n{select}detail vdisk\nexit\n")
}

pub(super) fn detach_vdisk(path: &Path) -> String {
    format!("{}detach vdisk\nexit\n", select_vdisk(path))
}

pub(super) fn detail_disk(disk_number: u32) -> String {
    format!("select disk {disk_number}\ndetail disk\nexit\n")
}

pub(super) fn assign_letter(disk_number: u32, letter: char) -> String {
    format!(
        "select disk {disk_number}\nselect partition {OS_PARTITION_NUMBER}\nassign letter={letter}\nexit\n"
    )
}

pub(super) fn list_volume() -> String {
    "list volume\nexit\n".to_string()
}

/// Parse `Associated disk#: N` from `detail vdisk` output.
pub(super) fn parse_associated_disk(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("associated disk#") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// One row of a diskpart volume table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct VolumeRow {
    pub letter: Option<char>,
    pub label: Option<String>,
    pub fs: Option<String>,
}

/// Parse the `Volume ###  Ltr  Label  Fs ...` rows of `list volume` or
/// `detail disk`.
///
/// Columns are whitespace-aligned; a volume without a letter simply has
/// one token fewer, so the letter is recognised as a single ASCII letter
/// in the third position.
pub(super) fn parse_volumes(output: &str) -> Vec<VolumeRow> {
    output
        .lines()
        .map(str::trim_start)
        .map(|line| line.trim_start_matches('*').trim_start())
        .filter(|line| line.starts_with("Volume ") && !line.starts_with("Volume ###"))
        .map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let mut rest = &tokens[2.min(tokens.len())..];
            let letter = match rest.first() {
                Some(t) if t.len() == 1 && t.chars().all(|c| c.is_ascii_alphabetic()) => {
                    let c = t.chars().next().map(|c| c.to_ascii_uppercase());
                    rest = &rest[1..];
                    c
                }
                _ => None,
            };
            let fs_pos = rest
                .iter()
                .position(|t| matches!(t.to_ascii_uppercase().as_str(), "NTFS" | "FAT32" | "FAT" | "REFS" | "RAW" | "CDFS" | "UDF"));
            let (label, fs) = match fs_pos {
                Some(pos) => (
                    (pos > 0).then(|| rest[..pos].join(" ")),
                    Some(rest[pos].to_string()),
                ),
                None => (None, None),
            };
            VolumeRow { letter, label, fs }
        })
        .collect()
}

/// Letter of the OS volume in `detail disk` output.
pub(super) fn os_volume_letter(output: &str) -> Option<char> {
    let volumes = parse_volumes(output);
    volumes
        .iter()
        .find(|v| v.label.as_deref() == Some(OS_VOLUME_LABEL))
        .or_else(|| {
            volumes
                .iter()
                .filter(|v| v.fs.as_deref().is_some_and(|fs| fs.eq_ignore_ascii_case("NTFS")))
                .last()
        })
        .and_then(|v| v.letter)
}

/// True when `detail disk` shows an uninitialised disk.
pub(super) fn is_raw_disk(output: &str) -> bool {
    output.contains("There are no volumes") || parse_volumes(output).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const DETAIL_VDISK: &str = "\
Device type ID: 0 (Unknown)
Vendor ID: {00000000-0000-0000-0000-000000000000} (Unknown)
State: Attached
Virtual size:   64 GB
Physical size: 4096 KB
Filename: C:\\FFU\\_FFU-Build.vhd
Is Child: No
Parent Filename:
Associated disk#: 3
";

    const DETAIL_DISK: &str = "\
Msft Virtual Disk SCSI Disk Device
Disk ID: {6F1C0D3A-1111-2222-3333-444455556666}
Type   : File Backed Virtual

  Volume ###  Ltr  Label        Fs     Type        Size     Status     Info
  ----------  ---  -----------  -----  ----------  -------  ---------  --------
  Volume 5         System       FAT32  Partition    260 MB  Healthy    Hidden
  Volume 6     W   Windows      NTFS   Partition     63 GB  Healthy
";

    #[test]
    fn test_parse_associated_disk() {
        assert_eq!(parse_associated_disk(DETAIL_VDISK), Some(3));
        assert_eq!(parse_associated_disk("State: Detached"), None);
    }

    #[test]
    fn test_parse_volumes_with_and_without_letter() {
        let volumes = parse_volumes(DETAIL_DISK);
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].letter, None);
        assert_eq!(volumes[0].label.as_deref(), Some("System"));
        assert_eq!(volumes[1].letter, Some('W'));
        assert_eq!(volumes[1].fs.as_deref(), Some("NTFS"));
    }

    #[test]
    fn test_os_volume_letter() {
        assert_eq!(os_volume_letter(DETAIL_DISK), Some('W'));
        let unlettered = DETAIL_DISK.replace("Volume 6     W   Windows", "Volume 6         Windows");
        assert_eq!(os_volume_letter(&unlettered), None);
    }

    #[test]
    fn test_raw_disk_detection() {
        assert!(is_raw_disk("Disk ID: 00000000\n\nThere are no volumes.\n"));
        assert!(!is_raw_disk(DETAIL_DISK));
    }

    #[test]
    fn test_create_vdisk_sizes_in_mib() {
        let script = create_vdisk(&PathBuf::from("C:\\FFU\\d.vhd"), 64 << 30, DiskType::Dynamic);
        assert!(script.contains("maximum=65536 type=expandable"));
        let script = create_vdisk(&PathBuf::from("C:\\FFU\\d.vhd"), 1, DiskType::Fixed);
        assert!(script.contains("maximum=1 type=fixed"));
    }

    #[test]
    fn test_assign_letter_targets_os_partition() {
        let script = assign_letter(3, 'Y');
        assert!(script.contains("select partition 3"));
        assert!(script.contains("assign letter=Y"));
    }
}
