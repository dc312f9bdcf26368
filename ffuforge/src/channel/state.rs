//! Build lifecycle state and state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a build.
///
/// ```text
/// NotStarted → Initializing → Running → Completed
///                   │            │
///                   │            ├──→ Failed
///                   ├──→ Failed  └──→ Cancelling → Cancelled | Failed
///                   └──→ Cancelling
/// ```
///
/// Only the orchestrator writes it; everyone else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BuildState {
    NotStarted = 0,
    Initializing = 1,
    Running = 2,
    Cancelling = 3,
    Cancelled = 4,
    Completed = 5,
    Failed = 6,
}

impl BuildState {
    /// Completed, Failed and Cancelled never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Completed | BuildState::Failed | BuildState::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BuildState::Initializing | BuildState::Running | BuildState::Cancelling
        )
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: BuildState) -> bool {
        use BuildState::*;
        matches!(
            (self, target),
            (NotStarted, Initializing) |
            // Initializing → Running (validated) or Failed (validation) or Cancelling
            (Initializing, Running) |
            (Initializing, Failed) |
            (Initializing, Cancelling) |
            (Running, Completed) |
            (Running, Failed) |
            (Running, Cancelling) |
            // Cleanup after cancel can still fail hard
            (Cancelling, Cancelled) |
            (Cancelling, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::NotStarted => "not_started",
            BuildState::Initializing => "initializing",
            BuildState::Running => "running",
            BuildState::Cancelling => "cancelling",
            BuildState::Cancelled => "cancelled",
            BuildState::Completed => "completed",
            BuildState::Failed => "failed",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => BuildState::Initializing,
            2 => BuildState::Running,
            3 => BuildState::Cancelling,
            4 => BuildState::Cancelled,
            5 => BuildState::Completed,
            6 => BuildState::Failed,
            _ => BuildState::NotStarted,
        }
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BuildState; 7] = [
        BuildState::NotStarted,
        BuildState::Initializing,
        BuildState::Running,
        BuildState::Cancelling,
        BuildState::Cancelled,
        BuildState::Completed,
        BuildState::Failed,
    ];

    #[test]
    fn test_valid_transitions() {
        assert!(BuildState::NotStarted.can_transition_to(BuildState::Initializing));
        assert!(BuildState::Initializing.can_transition_to(BuildState::Failed));
        assert!(BuildState::Running.can_transition_to(BuildState::Cancelling));
        assert!(BuildState::Cancelling.can_transition_to(BuildState::Cancelled));

        assert!(!BuildState::NotStarted.can_transition_to(BuildState::Running));
        assert!(!BuildState::Running.can_transition_to(BuildState::Cancelled));
        assert!(!BuildState::Cancelling.can_transition_to(BuildState::Completed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in ALL.iter().filter(|s| s.is_terminal()) {
            for target in ALL {
                assert!(!state.can_transition_to(target), "{state} -> {target}");
            }
        }
    }

    #[test]
    fn test_u8_round_trip() {
        for state in ALL {
            assert_eq!(BuildState::from_u8(state.as_u8()), state);
        }
    }
}
