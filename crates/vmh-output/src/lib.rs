//! # VMH Output
//!
//! Output capture for the VM integration harness.
//!
//! This crate provides:
//! - An append-only [`OutputBuffer`] shared between the pump and observers
//! - The [`OutputPump`], which drains a target's output stream on its own
//!   task so writes to the target can never deadlock against a full pipe
//! - Transcript sinks that mirror captured output live (file, console)

pub mod buffer;
pub mod pump;
pub mod sink;
pub mod types;

// Re-export main types
pub use buffer::OutputBuffer;
pub use pump::{OutputPump, PumpHandle};
pub use sink::{ConsoleEcho, FileSink, OutputSink};
pub use types::PumpStatus;
