//! # VMH Session
//!
//! Drives one emulator-hosted integration test from launch to a reaped
//! target.
//!
//! This crate provides:
//! - `TestSession` - launch → sequence → terminate → collect
//! - `CommandSequencer` - ordered, settle-delayed writes to the target's console
//! - `TerminationController` - polite signal, grace window, forced kill
//! - Monitor protocol constants and the default monitor script
//! - YAML configuration and validation

pub mod config;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod termination;

// Re-export main types
pub use config::{
    CaptureConfig, EmulatorConfig, HarnessConfig, ProtocolConfig, RawLaunchConfig,
    SessionOptions, StepConfig,
};
pub use protocol::{default_monitor_script, CommandStep, MonitorProtocol, QEMU_MONITOR_ESCAPE};
pub use sequencer::CommandSequencer;
pub use session::{
    SessionFailure, SessionReport, SessionResult, SessionTiming, TestSession, MIN_DRAIN_WINDOW,
};
pub use termination::{TerminationController, FORCE_KILL_TIMEOUT};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
