//! Process termination primitives.
//!
//! Only the polite signal lives here. The forceful kill goes through the
//! owned child handle (`ChildProcess::start_kill`), which can never hit a
//! recycled PID.

use tracing::debug;
use vmh_common::HarnessResult;

/// Send the polite termination signal (SIGTERM) to a process.
///
/// Returns `Ok(false)` if the process no longer exists.
#[cfg(unix)]
pub fn terminate_gracefully(pid: u32) -> HarnessResult<bool> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);
    match kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "Sent SIGTERM");
            Ok(true)
        }
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(e) => Err(vmh_common::HarnessError::signal(pid, e.to_string())),
    }
}

/// There is no polite signal for a console-less child on this platform;
/// callers fall through to the forceful kill.
#[cfg(not(unix))]
pub fn terminate_gracefully(pid: u32) -> HarnessResult<bool> {
    debug!(pid, "Polite termination unsupported on this platform");
    Err(vmh_common::HarnessError::signal(
        pid,
        "polite termination is not supported on this platform",
    ))
}
