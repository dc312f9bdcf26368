//! Drive-letter resolution for mounted virtual disks.
//!
//! Attaching a virtual disk does not guarantee Windows assigns a letter to
//! the OS partition. Providers resolve one explicitly through
//! [`resolve_drive_letter`], which queries, assigns a free letter when none
//! is present, and retries with exponential back-off.

use async_trait::async_trait;
use ffuforge_shared::errors::{FfuError, FfuResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Letters never handed out: floppy drives and the usual system volume.
const RESERVED_LETTERS: &[char] = &['A', 'B', 'C'];

/// Retry policy for drive-letter resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles every attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// A virtual disk attached to the host with a usable drive letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountHandle {
    pub disk_path: PathBuf,
    /// Host disk number (`\\.\PhysicalDriveN`).
    pub disk_number: u32,
    /// Letter of the OS volume, upper case.
    pub drive_letter: char,
}

impl MountHandle {
    /// Root of the OS volume, e.g. `W:\`.
    pub fn root(&self) -> PathBuf {
        PathBuf::from(format!("{}:\\", self.drive_letter))
    }

    /// Raw device path used by the imaging tool.
    pub fn physical_drive(&self) -> String {
        format!("\\\\.\\PhysicalDrive{}", self.disk_number)
    }
}

/// Volume queries needed to resolve a drive letter.
///
/// Hyper-V answers these through the Storage PowerShell module, the
/// workstation backend through diskpart.
#[async_trait]
pub trait VolumeOps: Send + Sync {
    /// Letter currently assigned to the OS partition of `disk_number`.
    async fn query_letter(&self, disk_number: u32) -> FfuResult<Option<char>>;

    /// Assign `letter` to the OS partition of `disk_number`.
    async fn assign_letter(&self, disk_number: u32, letter: char) -> FfuResult<()>;

    /// Letters currently in use on the host.
    async fn used_letters(&self) -> FfuResult<Vec<char>>;
}

/// Pick the highest free letter, skipping reserved ones.
///
/// Searching from `Z` downward keeps clear of letters Windows hands out
/// to removable media.
pub fn free_letter(used: &[char]) -> Option<char> {
    ('D'..='Z').rev().find(|letter| {
        !RESERVED_LETTERS.contains(letter)
            && !used.iter().any(|u| u.eq_ignore_ascii_case(letter))
    })
}

/// Resolve a usable letter for the OS volume of `disk_number`.
///
/// Intermediate failures are logged and retried; only when every attempt
/// fails does the caller see a `Provisioning` error.
pub async fn resolve_drive_letter(
    ops: &dyn VolumeOps,
    disk_path: &Path,
    disk_number: u32,
    policy: &RetryPolicy,
) -> FfuResult<char> {
    let attempts = policy.attempts.max(1);
    let mut last_error = String::from("no drive letter assigned");

    for attempt in 1..=attempts {
        match try_resolve(ops, disk_number).await {
            Ok(Some(letter)) => {
                tracing::debug!(
                    disk = %disk_path.display(),
                    disk_number,
                    letter = %letter,
                    attempt,
                    "Resolved drive letter"
                );
                return Ok(letter.to_ascii_uppercase());
            }
            Ok(None) => {
                last_error = "no drive letter assigned".to_string();
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        if attempt < attempts {
            let delay = policy.backoff(attempt);
            tracing::warn!(
                disk = %disk_path.display(),
                disk_number,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "Drive letter not available yet: {}", last_error
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(FfuError::Provisioning(format!(
        "could not assign a drive letter to {} after {} attempts: {}",
        disk_path.display(),
        attempts,
        last_error
    )))
}

async fn try_resolve(ops: &dyn VolumeOps, disk_number: u32) -> FfuResult<Option<char>> {
    if let Some(letter) = ops.query_letter(disk_number).await? {
        return Ok(Some(letter));
    }

    let used = ops.used_letters().await?;
    let letter = free_letter(&used)
        .ok_or_else(|| FfuError::Provisioning("no free drive letters on host".to_string()))?;
    ops.assign_letter(disk_number, letter).await?;

    ops.query_letter(disk_number).await
}
