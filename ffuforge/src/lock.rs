//! One build per work directory.
//!
//! The build VM name, disk path and capture share are fixed per work
//! directory, so two concurrent builds there would tear down each other's
//! resources. An exclusive advisory lock on `<work_dir>/.ffuforge.lock`
//! rules that out.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use ffuforge_shared::errors::{FfuError, FfuResult};

pub const LOCK_FILE: &str = ".ffuforge.lock";

/// Exclusive lock on a work directory, released on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Try to lock `work_dir` without blocking.
    ///
    /// Fails with `InvalidState` if another build holds the lock.
    pub fn acquire(work_dir: &Path) -> FfuResult<Self> {
        std::fs::create_dir_all(work_dir)
            .map_err(|e| FfuError::Storage(format!("failed to create work dir: {}", e)))?;

        let lock_path = work_dir.join(LOCK_FILE);

        // Never unlink the file: a second process could then lock a fresh
        // inode at the same path.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| FfuError::Storage(format!("failed to open lock file: {}", e)))?;

        if file.try_lock_exclusive().is_err() {
            return Err(FfuError::InvalidState(format!(
                "Another build is already using directory: {}\n\
                 Only one build can run per work directory at a time.",
                work_dir.display()
            )));
        }

        tracing::debug!(lock_path = %lock_path.display(), "Acquired build lock");

        Ok(Self {
            file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock_path = %self.path.display(), "Failed to release build lock: {}", e);
            return;
        }
        tracing::debug!(lock_path = %self.path.display(), "Released build lock");
    }
}
