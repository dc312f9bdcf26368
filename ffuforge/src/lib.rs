//! ffuforge: build orchestration engine for FFU disk images.
//!
//! A build drives a virtual machine through install, customise and capture
//! on one of several hypervisor backends and packages the result into an
//! FFU image. The pieces:
//!
//! - [`provider`]: uniform [`HypervisorProvider`] trait with Hyper-V and
//!   workstation backends, selected through a compile-time registry
//! - [`cleanup`]: LIFO registry of teardown actions for everything a build
//!   creates
//! - [`channel`]: non-blocking message queue, build state and cancellation
//!   flag shared between worker and controller
//! - [`orchestrator`]: the phase state machine with cancellation checkpoints
//! - [`controller`]: launches a build on its own task, polls it and enforces
//!   the cancellation grace period
//! - [`imaging`]: default DISM/PowerShell implementation of the build steps

pub mod channel;
pub mod cleanup;
pub mod config;
pub mod controller;
pub mod imaging;
pub mod lock;
pub mod orchestrator;
pub mod provider;
pub mod tools;
pub mod util;

pub use channel::{BuildChannel, BuildMessage, BuildState, ChannelOptions, MessageLevel};
pub use cleanup::{CleanupKind, CleanupOutcome, CleanupRegistry, CleanupResult, CleanupSummary};
pub use config::BuildConfig;
pub use controller::{BuildController, BuildHandle, BuildSummary, CleanupStatus};
pub use orchestrator::{BuildOrchestrator, BuildPhase, BuildReport, BuildSteps, StepOutcome};
pub use provider::{
    HypervisorProvider, MountHandle, ProviderKind, ProviderOptions, VmConfiguration, VmInfo,
    VmState,
};

pub use ffuforge_shared::errors::{FfuError, FfuResult};
