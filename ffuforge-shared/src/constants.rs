//! Shared constants
//!
//! Values the engine and its callers must agree on.

/// Memory bounds enforced by configuration validation.
pub mod memory {
    /// One gibibyte.
    pub const GIB: u64 = 1024 * 1024 * 1024;

    /// Smallest VM memory accepted by any provider.
    pub const MIN_MEMORY_BYTES: u64 = 2 * GIB;
}

/// VM power-state polling.
pub mod polling {
    /// Consecutive `Unknown` state answers before the VM's existence is checked.
    pub const UNKNOWN_STATES_BEFORE_EXISTS_CHECK: u32 = 3;
}

/// Environment variables read by the engine.
pub mod envs {
    /// Overrides the default work directory (`~/.ffuforge`).
    pub const FFUFORGE_HOME: &str = "FFUFORGE_HOME";
}

/// Build messaging defaults.
pub mod channel {
    /// Default number of queued messages before the oldest is dropped.
    pub const DEFAULT_CAPACITY: usize = 65_536;

    /// Controller polling interval in milliseconds (20 Hz).
    pub const POLL_INTERVAL_MS: u64 = 50;

    /// Default maximum number of messages returned by one drain.
    pub const DRAIN_BATCH: usize = 256;
}

/// Source tags attached to build messages.
pub mod sources {
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const CLEANUP: &str = "cleanup";
    pub const PROVIDER: &str = "provider";
    pub const IMAGING: &str = "imaging";
    pub const CONTROLLER: &str = "controller";
}
