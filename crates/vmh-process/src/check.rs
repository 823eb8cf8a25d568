//! Process existence checking.

use vmh_common::HarnessResult;

/// Check if a process with the given PID exists.
///
/// On Unix this uses `kill(pid, 0)`, which sends no signal but reports
/// whether the process exists. A zombie (exited but not yet reaped) still
/// counts as existing.
///
/// # Returns
///
/// * `Ok(true)` - Process exists
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - Error occurred while checking
#[cfg(unix)]
pub fn process_exists(pid: u32) -> HarnessResult<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);

    match kill(nix_pid, None) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        // Exists, but owned by someone else
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(vmh_common::HarnessError::signal(
            pid,
            format!("Failed to check process: {}", e),
        )),
    }
}

#[cfg(not(unix))]
pub fn process_exists(pid: u32) -> HarnessResult<bool> {
    Err(vmh_common::HarnessError::signal(
        pid,
        "process existence check is not supported on this platform",
    ))
}
