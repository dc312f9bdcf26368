//! Idempotent filesystem teardown helpers.

use ffuforge_shared::errors::{FfuError, FfuResult};
use std::io::ErrorKind;
use std::path::Path;

/// Remove a file; a file that is already gone counts as removed.
pub async fn remove_file_idempotent(path: &Path) -> FfuResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FfuError::Cleanup {
            target: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Remove a directory tree; a directory that is already gone counts as removed.
pub async fn remove_dir_idempotent(path: &Path) -> FfuResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FfuError::Cleanup {
            target: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Empty a directory tree except for `keep` and the directories leading to it.
///
/// Removes the whole tree when `keep` is not inside `dir`.
pub async fn remove_dir_keeping(dir: &Path, keep: &Path) -> FfuResult<()> {
    if !keep.starts_with(dir) {
        return remove_dir_idempotent(dir).await;
    }
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(FfuError::Cleanup {
                target: dir.display().to_string(),
                reason: e.to_string(),
            });
        }
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path == keep {
            continue;
        }
        if keep.starts_with(&path) {
            Box::pin(remove_dir_keeping(&path, keep)).await?;
        } else if entry.file_type().await?.is_dir() {
            remove_dir_idempotent(&path).await?;
        } else {
            remove_file_idempotent(&path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remove_file_twice() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("image.ffu");
        std::fs::write(&file, b"ffu").unwrap();

        remove_file_idempotent(&file).await.unwrap();
        assert!(!file.exists());
        remove_file_idempotent(&file).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_dir_twice() {
        let dir = TempDir::new().unwrap();
        let vm_dir = dir.path().join("vm");
        std::fs::create_dir_all(vm_dir.join("snapshots")).unwrap();

        remove_dir_idempotent(&vm_dir).await.unwrap();
        assert!(!vm_dir.exists());
        remove_dir_idempotent(&vm_dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_dir_keeping_spares_nested_file() {
        let dir = TempDir::new().unwrap();
        let vm_dir = dir.path().join("vm");
        let disks = vm_dir.join("disks");
        std::fs::create_dir_all(vm_dir.join("caches")).unwrap();
        std::fs::create_dir_all(&disks).unwrap();
        let disk = disks.join("_FFU-Build.vhd");
        std::fs::write(&disk, b"vhd").unwrap();
        std::fs::write(disks.join("other.log"), b"log").unwrap();
        std::fs::write(vm_dir.join("_FFU-Build.vmx"), b"vmx").unwrap();

        remove_dir_keeping(&vm_dir, &disk).await.unwrap();

        assert!(disk.exists());
        assert!(!disks.join("other.log").exists());
        assert!(!vm_dir.join("_FFU-Build.vmx").exists());
        assert!(!vm_dir.join("caches").exists());
    }

    #[tokio::test]
    async fn test_remove_dir_keeping_outside_path_removes_all() {
        let dir = TempDir::new().unwrap();
        let vm_dir = dir.path().join("vm");
        std::fs::create_dir_all(&vm_dir).unwrap();
        std::fs::write(vm_dir.join("_FFU-Build.vmx"), b"vmx").unwrap();

        remove_dir_keeping(&vm_dir, &dir.path().join("_FFU-Build.vhd"))
            .await
            .unwrap();
        assert!(!vm_dir.exists());
        remove_dir_keeping(&vm_dir, &dir.path().join("vm").join("d.vhd"))
            .await
            .unwrap();
    }
}
