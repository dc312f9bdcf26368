//! DISM command lines.

use crate::tools::CommandSpec;
use std::path::Path;
use std::time::Duration;

pub const TOOL: &str = "dism.exe";

fn dism(timeout: Duration) -> CommandSpec {
    CommandSpec::new(TOOL, timeout).args(["/English", "/LogLevel:3"])
}

/// Apply `index` of `image` to `apply_dir` (a drive root).
pub fn apply_image(image: &Path, index: u32, apply_dir: &str, timeout: Duration) -> CommandSpec {
    dism(timeout).args([
        "/Apply-Image".to_string(),
        format!("/ImageFile:{}", image.display()),
        format!("/Index:{index}"),
        format!("/ApplyDir:{apply_dir}"),
    ])
}

/// Capture a whole physical drive into an FFU file.
pub fn capture_ffu(drive: &str, output: &Path, name: &str, timeout: Duration) -> CommandSpec {
    dism(timeout).args([
        "/Capture-FFU".to_string(),
        format!("/ImageFile:{}", output.display()),
        format!("/CaptureDrive:{drive}"),
        format!("/Name:{name}"),
        "/Compress:Default".to_string(),
    ])
}

pub fn optimize_ffu(ffu: &Path, timeout: Duration) -> CommandSpec {
    dism(timeout).args([
        "/Optimize-FFU".to_string(),
        format!("/ImageFile:{}", ffu.display()),
    ])
}

pub fn mount_image(image: &Path, mount_dir: &Path, timeout: Duration) -> CommandSpec {
    dism(timeout).args([
        "/Mount-Image".to_string(),
        format!("/ImageFile:{}", image.display()),
        "/Index:1".to_string(),
        format!("/MountDir:{}", mount_dir.display()),
    ])
}

pub fn add_driver(mount_dir: &Path, drivers: &Path, timeout: Duration) -> CommandSpec {
    dism(timeout).args([
        format!("/Image:{}", mount_dir.display()),
        "/Add-Driver".to_string(),
        format!("/Driver:{}", drivers.display()),
        "/Recurse".to_string(),
    ])
}

/// Unmount, keeping changes when `commit` is set.
pub fn unmount_image(mount_dir: &Path, commit: bool, timeout: Duration) -> CommandSpec {
    dism(timeout).args([
        "/Unmount-Image".to_string(),
        format!("/MountDir:{}", mount_dir.display()),
        if commit { "/Commit" } else { "/Discard" }.to_string(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const T: Duration = Duration::from_secs(60);

    #[test]
    fn test_apply_image_args() {
        let spec = apply_image(&PathBuf::from("D:\\sources\\install.wim"), 6, "W:\\", T);
        assert_eq!(spec.program, TOOL);
        assert!(spec.args.contains(&"/Apply-Image".to_string()));
        assert!(spec.args.contains(&"/Index:6".to_string()));
        assert!(spec.args.contains(&"/ApplyDir:W:\\".to_string()));
    }

    #[test]
    fn test_capture_ffu_targets_physical_drive() {
        let spec = capture_ffu("\\\\.\\PhysicalDrive3", &PathBuf::from("out.ffu"), "Win11", T);
        assert!(spec.display_line().contains("/CaptureDrive:\\\\.\\PhysicalDrive3"));
        assert!(spec.args.contains(&"/Name:Win11".to_string()));
    }

    #[test]
    fn test_unmount_commit_or_discard() {
        let dir = PathBuf::from("mnt");
        assert!(unmount_image(&dir, true, T).args.contains(&"/Commit".to_string()));
        assert!(unmount_image(&dir, false, T).args.contains(&"/Discard".to_string()));
    }
}
