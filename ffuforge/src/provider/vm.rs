//! VM lifecycle state and runtime snapshot.

use super::{HypervisorProvider, ProviderKind};
use chrono::{DateTime, Utc};
use ffuforge_shared::errors::{FfuError, FfuResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Power state of a build VM.
///
/// ```text
/// Unknown ─→ any
/// Off ─→ Starting ─→ Running ─→ Stopping ─→ Off
///                      │
///                      └─→ Saved / Suspended ─→ Starting / Running / Off
/// ```
///
/// Transitions are driven by provider calls (`start_vm`, `stop_vm`) or by
/// reconciliation through [`VmInfo::refresh_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// Cannot determine state (platform query failed).
    Unknown,
    Off,
    Starting,
    Running,
    Stopping,
    /// State saved to disk.
    Saved,
    /// Paused in memory.
    Suspended,
}

impl VmState {
    pub fn is_running(&self) -> bool {
        matches!(self, VmState::Running)
    }

    pub fn is_off(&self) -> bool {
        matches!(self, VmState::Off)
    }

    /// Transient states the platform will leave on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, VmState::Starting | VmState::Stopping)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, VmState::Off | VmState::Saved | VmState::Suspended)
    }

    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            VmState::Running | VmState::Starting | VmState::Saved | VmState::Suspended
        )
    }

    /// Check if a provider-driven transition to `target` is valid.
    pub fn can_transition_to(&self, target: VmState) -> bool {
        use VmState::*;
        matches!(
            (self, target),
            (Unknown, _) |
            (Off, Starting) |
            (Off, Unknown) |
            (Starting, Running) |
            (Starting, Off) |
            (Starting, Unknown) |
            (Running, Stopping) |
            (Running, Off) |
            (Running, Saved) |
            (Running, Suspended) |
            (Running, Unknown) |
            (Stopping, Off) |
            (Stopping, Unknown) |
            (Saved, Starting) |
            (Saved, Running) |
            (Saved, Off) |
            (Suspended, Starting) |
            (Suspended, Running) |
            (Suspended, Off)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::Unknown => "unknown",
            VmState::Off => "off",
            VmState::Starting => "starting",
            VmState::Running => "running",
            VmState::Stopping => "stopping",
            VmState::Saved => "saved",
            VmState::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for VmState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(VmState::Unknown),
            "off" | "poweredoff" => Ok(VmState::Off),
            "starting" => Ok(VmState::Starting),
            "running" | "poweredon" => Ok(VmState::Running),
            "stopping" => Ok(VmState::Stopping),
            "saved" => Ok(VmState::Saved),
            "paused" | "suspended" => Ok(VmState::Suspended),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a VM's identity and runtime state.
///
/// Owned by the orchestrator for one build; never shared across threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    /// Provider-opaque identifier (Hyper-V VMId, vmrest id).
    pub id: String,
    pub name: String,
    pub hypervisor: ProviderKind,
    pub state: VmState,
    pub memory_bytes: u64,
    pub ip_addresses: Vec<String>,
    pub config_path: Option<PathBuf>,
    pub disk_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl VmInfo {
    /// Apply a provider-driven transition.
    ///
    /// Returns an error if the transition is not valid.
    pub(crate) fn transition_to(&mut self, target: VmState) -> FfuResult<()> {
        if !self.state.can_transition_to(target) {
            return Err(FfuError::InvalidState(format!(
                "VM '{}' cannot go from {} to {}",
                self.name, self.state, target
            )));
        }
        self.state = target;
        Ok(())
    }

    /// Reconcile the recorded state with the platform.
    ///
    /// External reconciliation may jump between any two states.
    pub async fn refresh_state(&mut self, provider: &dyn HypervisorProvider) -> VmState {
        let observed = provider.get_vm_state(self).await;
        if observed != self.state {
            tracing::debug!(vm = %self.name, from = %self.state, to = %observed, "VM state reconciled");
        }
        self.state = observed;
        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: VmState) -> VmInfo {
        VmInfo {
            id: "vm-1".into(),
            name: "_FFU-Build".into(),
            hypervisor: ProviderKind::HyperV,
            state,
            memory_bytes: 8 << 30,
            ip_addresses: vec![],
            config_path: None,
            disk_path: PathBuf::from("C:\\FFU\\build.vhdx"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_transitions() {
        assert!(VmState::Off.can_transition_to(VmState::Starting));
        assert!(VmState::Starting.can_transition_to(VmState::Running));
        assert!(VmState::Running.can_transition_to(VmState::Stopping));
        assert!(VmState::Stopping.can_transition_to(VmState::Off));
        assert!(VmState::Running.can_transition_to(VmState::Saved));
        assert!(VmState::Unknown.can_transition_to(VmState::Running));

        assert!(!VmState::Off.can_transition_to(VmState::Stopping));
        assert!(!VmState::Stopping.can_transition_to(VmState::Running));
        assert!(!VmState::Off.can_transition_to(VmState::Saved));
    }

    #[test]
    fn test_transition_rejects_invalid() {
        let mut vm = info(VmState::Off);
        assert!(vm.transition_to(VmState::Stopping).is_err());
        assert_eq!(vm.state, VmState::Off);

        vm.transition_to(VmState::Starting).unwrap();
        vm.transition_to(VmState::Running).unwrap();
        assert!(vm.state.is_running());
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!("Running".parse(), Ok(VmState::Running));
        assert_eq!("poweredOff".parse(), Ok(VmState::Off));
        assert_eq!("paused".parse(), Ok(VmState::Suspended));
        assert!("exploded".parse::<VmState>().is_err());
    }

    #[test]
    fn test_can_start_and_stop() {
        assert!(VmState::Off.can_start());
        assert!(!VmState::Running.can_start());
        assert!(VmState::Running.can_stop());
        assert!(!VmState::Off.can_stop());
        assert!(VmState::Stopping.is_transient());
    }
}
