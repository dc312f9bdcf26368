//! Host prerequisites for the hypervisor backends.
//!
//! Fail fast with diagnostics before a build touches anything: FFU capture
//! needs a Windows host running elevated, whichever hypervisor is used.

use super::ProviderKind;
use ffuforge_shared::errors::{FfuError, FfuResult};

/// Result of a successful host check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSupport {
    /// Human-readable reason for support status
    pub reason: String,
}

/// Check that this host can run builds with `kind`.
///
/// # Errors
///
/// Returns `FfuError::ProviderUnavailable` with suggestions if:
/// - the host is not Windows
/// - the process is not elevated (diskpart, DISM and Hyper-V all need it)
pub fn check_host_support(kind: ProviderKind) -> FfuResult<HostSupport> {
    #[cfg(windows)]
    {
        check_windows_host(kind)
    }

    #[cfg(not(windows))]
    {
        Err(FfuError::ProviderUnavailable(format!(
            "{} builds require a Windows host (running on {})\n\n\
             Suggestions:\n\
             - Run ffuforge on Windows 10/11 or Windows Server\n\
             - Use `ffuforge validate` to check a config on this host",
            kind,
            std::env::consts::OS
        )))
    }
}

#[cfg(windows)]
fn check_windows_host(kind: ProviderKind) -> FfuResult<HostSupport> {
    use std::process::Command;

    // `net session` only succeeds in an elevated shell.
    let elevated = Command::new("net")
        .arg("session")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);

    if !elevated {
        return Err(FfuError::ProviderUnavailable(
            "ffuforge must run elevated\n\n\
             Suggestions:\n\
             - Start the terminal with \"Run as administrator\""
                .to_string(),
        ));
    }

    let reason = match kind {
        ProviderKind::HyperV => "Windows host, elevated; Hyper-V service is checked next",
        ProviderKind::Workstation => "Windows host, elevated; vmrun and vmrest are checked next",
    };
    Ok(HostSupport {
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(windows))]
    fn test_non_windows_host_is_rejected() {
        let err = check_host_support(ProviderKind::HyperV).unwrap_err();
        assert!(matches!(err, FfuError::ProviderUnavailable(_)));
        assert!(err.to_string().contains("Windows host"));
    }

    #[test]
    #[cfg(windows)]
    fn test_windows_host_check_runs() {
        match check_host_support(ProviderKind::HyperV) {
            Ok(support) => assert!(support.reason.contains("elevated")),
            Err(e) => assert!(e.to_string().contains("elevated")),
        }
    }
}
