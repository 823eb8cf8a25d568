//! Error types for the VM integration harness.
//!
//! Every fallible harness operation returns [`HarnessResult`]. The variants
//! follow the lifecycle of a single test session: a target that cannot be
//! spawned, an input stream that breaks mid-script, an output stream that
//! reports an error, and an overall deadline that elapses.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Main error type for harness operations.
///
/// Failures that happen after the target was launched carry whatever output
/// had been captured up to that point, so a broken run can still be
/// diagnosed from the error alone.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The target process could not be created.
    #[error("Spawn failed: {executable} - {reason}")]
    Spawn { executable: String, reason: String },

    /// Writing a command step to the target's input stream failed.
    #[error("Command write failed at step {step_index}: {reason}")]
    CommandWrite {
        step_index: usize,
        reason: String,
        captured_output: Vec<u8>,
    },

    /// The target's output stream reported an error before end-of-stream.
    #[error("Output read error: {reason}")]
    Read { reason: String },

    /// The overall session deadline elapsed.
    #[error("Session timed out during {phase} after {elapsed:?}")]
    TimedOut {
        phase: String,
        elapsed: Duration,
        captured_output: Vec<u8>,
    },

    /// A signal could not be delivered to the target.
    #[error("Signal delivery failed: pid {pid} - {reason}")]
    Signal { pid: u32, reason: String },

    /// Invalid launch or session configuration.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// An operation was attempted in the wrong session state.
    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn spawn_failed(executable: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            executable: executable.into(),
            reason: reason.into(),
        }
    }

    pub fn command_write(
        step_index: usize,
        reason: impl Into<String>,
        captured_output: Vec<u8>,
    ) -> Self {
        Self::CommandWrite {
            step_index,
            reason: reason.into(),
            captured_output,
        }
    }

    pub fn read(reason: impl Into<String>) -> Self {
        Self::Read {
            reason: reason.into(),
        }
    }

    pub fn timed_out(phase: impl Into<String>, elapsed: Duration, captured_output: Vec<u8>) -> Self {
        Self::TimedOut {
            phase: phase.into(),
            elapsed,
            captured_output,
        }
    }

    pub fn signal(pid: u32, reason: impl Into<String>) -> Self {
        Self::Signal {
            pid,
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Output captured before the failure, if this error carries any.
    pub fn captured_output(&self) -> Option<&[u8]> {
        match self {
            Self::CommandWrite {
                captured_output, ..
            }
            | Self::TimedOut {
                captured_output, ..
            } => Some(captured_output),
            _ => None,
        }
    }
}
