//! # VMH Process
//!
//! Low-level process operations for the VM integration harness.
//!
//! This crate provides primitives for:
//! - Building a reproducible launch specification for the target
//! - Spawning the target with a piped input stream and a single combined
//!   output/error stream
//! - Delivering the polite termination signal
//! - Process existence verification
//! - Launch specification validation

pub mod check;
pub mod launch;
pub mod terminate;
pub mod validation;

// Re-export main types
pub use check::*;
pub use launch::*;
pub use terminate::*;
pub use validation::*;
