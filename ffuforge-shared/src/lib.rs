//! ffuforge shared types
//!
//! Error taxonomy and constants used by the engine, the CLI and the test
//! utilities.

pub mod constants;
pub mod errors;

pub use errors::{FfuError, FfuResult};
