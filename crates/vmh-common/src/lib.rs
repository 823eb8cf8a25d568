//! # VMH Common
//!
//! Common types shared across the VM integration harness.
//!
//! This crate provides the foundational pieces every other `vmh-*` crate
//! builds upon: the harness error taxonomy and the value types describing
//! how a target process ended.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{HarnessError, HarnessResult};
pub use types::{ExitInfo, SessionStatus};
