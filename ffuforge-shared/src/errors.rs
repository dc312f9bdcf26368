//! Error taxonomy for the build engine.
//!
//! Variants are grouped by how the orchestrator reacts to them:
//! - [`FfuError::Validation`]: caught before any resource exists, never triggers cleanup
//! - [`FfuError::ProviderUnavailable`]: hypervisor platform unusable, build fails before any phase
//! - [`FfuError::Provisioning`], [`FfuError::OperationTimeout`], [`FfuError::VmNotFound`]:
//!   provisioning failures, cleanup runs before the error is reported
//! - [`FfuError::ExternalTool`]: nonzero exit from an imaging or partitioning tool
//! - [`FfuError::Cleanup`]: a teardown action failed; logged, never escalated

use std::time::Duration;
use thiserror::Error;

/// Result alias used across all ffuforge crates.
pub type FfuResult<T> = Result<T, FfuError>;

#[derive(Debug, Error)]
pub enum FfuError {
    /// Configuration rejected before anything was created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The selected hypervisor platform is not installed or not running.
    #[error("hypervisor provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// VM or disk creation failed part-way through.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// A platform call did not complete within its bound.
    #[error("{operation} timed out after {elapsed:?}")]
    OperationTimeout { operation: String, elapsed: Duration },

    /// A VM the build was driving no longer exists.
    #[error("virtual machine not found: {0}")]
    VmNotFound(String),

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed (exit code {code:?}): {detail}")]
    ExternalTool {
        tool: String,
        code: Option<i32>,
        detail: String,
    },

    /// A teardown action failed.
    #[error("cleanup failed for {target}: {reason}")]
    Cleanup { target: String, reason: String },

    /// A resource (file, share, account, disk) is already gone.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("build cancelled at {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FfuError {
    /// True when the error means "the resource is already gone".
    ///
    /// Teardown actions treat this as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FfuError::VmNotFound(_) | FfuError::NotFound(_))
    }

    /// True for errors the orchestrator treats as provisioning failures.
    pub fn is_provisioning_failure(&self) -> bool {
        matches!(
            self,
            FfuError::Provisioning(_) | FfuError::OperationTimeout { .. } | FfuError::VmNotFound(_)
        )
    }

    /// Short stable name of the error category, used in reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FfuError::Validation(_) => "validation",
            FfuError::ProviderUnavailable(_) => "provider_unavailable",
            FfuError::Provisioning(_) => "provisioning",
            FfuError::OperationTimeout { .. } => "operation_timeout",
            FfuError::VmNotFound(_) => "vm_not_found",
            FfuError::ExternalTool { .. } => "external_tool",
            FfuError::Cleanup { .. } => "cleanup",
            FfuError::NotFound(_) => "not_found",
            FfuError::InvalidState(_) => "invalid_state",
            FfuError::Config(_) => "config",
            FfuError::Storage(_) => "storage",
            FfuError::Cancelled(_) => "cancelled",
            FfuError::Internal(_) => "internal",
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        FfuError::OperationTimeout {
            operation: operation.into(),
            elapsed,
        }
    }
}

impl From<std::io::Error> for FfuError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            FfuError::NotFound(e.to_string())
        } else {
            FfuError::Storage(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FfuError {
    fn from(e: serde_json::Error) -> Self {
        FfuError::Config(format!("invalid JSON: {}", e))
    }
}
