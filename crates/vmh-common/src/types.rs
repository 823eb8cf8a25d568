//! Value types describing how a target process ended.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;

/// Exit code and terminating signal of a reaped process.
///
/// Exactly one of `code` and `signal` is set for a process that ended
/// normally or by a signal; both may be `None` on platforms that report
/// neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Returns true if the process exited normally with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit"),
        }
    }
}

/// Terminal status of a test session's target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionStatus {
    /// The target exited on its own before any termination signal was sent.
    ExitedBeforeSignal { exit: ExitInfo },

    /// The target exited within the grace window after the polite signal.
    ExitedAfterSignal { exit: ExitInfo },

    /// The target ignored the polite signal and was force-killed.
    ForceKilled,

    /// The overall session deadline elapsed; the target was force-killed.
    TimedOut,
}

impl SessionStatus {
    /// Exit information, if the target exited rather than being killed.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        match self {
            SessionStatus::ExitedBeforeSignal { exit } | SessionStatus::ExitedAfterSignal { exit } => {
                Some(*exit)
            }
            SessionStatus::ForceKilled | SessionStatus::TimedOut => None,
        }
    }

    /// Returns true if the harness had to send SIGKILL.
    pub fn was_killed(&self) -> bool {
        matches!(self, SessionStatus::ForceKilled | SessionStatus::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::ExitedBeforeSignal { .. } => "exited_before_signal",
            SessionStatus::ExitedAfterSignal { .. } => "exited_after_signal",
            SessionStatus::ForceKilled => "force_killed",
            SessionStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_info() {
            Some(exit) => write!(f, "{} ({})", self.as_str(), exit),
            None => write!(f, "{}", self.as_str()),
        }
    }
}
