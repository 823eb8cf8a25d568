//! Shutdown escalation: polite signal, bounded grace window, forced kill.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vmh_common::{ExitInfo, SessionStatus};
use vmh_process::{process_exists, terminate_gracefully, ChildProcess};

/// How long to wait for the OS to reap the target after SIGKILL.
pub const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(3);

/// Brings a [`ChildProcess`] to a reaped terminal state.
#[derive(Debug, Clone)]
pub struct TerminationController {
    session_id: String,
    grace_window: Duration,
}

impl TerminationController {
    pub fn new(session_id: impl Into<String>, grace_window: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            grace_window,
        }
    }

    pub fn grace_window(&self) -> Duration {
        self.grace_window
    }

    /// Terminate `child`, never waiting past `deadline` for a voluntary exit.
    ///
    /// The output pump keeps draining while this runs, so shutdown
    /// diagnostics printed by the target are still captured.
    pub async fn terminate(&self, child: &mut ChildProcess, deadline: Instant) -> SessionStatus {
        let pid = child.pid();

        match child.try_reap() {
            Ok(Some(status)) => {
                let exit = ExitInfo::from(status);
                info!(session_id = %self.session_id, pid, %exit, "Target exited before termination signal");
                return SessionStatus::ExitedBeforeSignal { exit };
            }
            Ok(None) => {}
            Err(e) => warn!(session_id = %self.session_id, pid, error = %e, "Failed to poll target exit status"),
        }

        if Instant::now() >= deadline {
            warn!(session_id = %self.session_id, pid, "Session deadline elapsed, killing target");
            self.force_kill(child).await;
            return SessionStatus::TimedOut;
        }

        info!(session_id = %self.session_id, pid, grace_window = ?self.grace_window, "Sending termination signal");

        let signalled = match terminate_gracefully(pid) {
            Ok(delivered) => {
                if !delivered {
                    debug!(session_id = %self.session_id, pid, "Target already gone when signalled");
                }
                true
            }
            Err(e) => {
                warn!(session_id = %self.session_id, pid, error = %e, "Failed to send termination signal");
                match process_exists(pid) {
                    Ok(exists) => debug!(session_id = %self.session_id, pid, exists, "Target existence after failed signal"),
                    Err(e) => debug!(session_id = %self.session_id, pid, error = %e, "Could not check target existence"),
                }
                false
            }
        };

        // A target blocked reading its console sees end-of-file as well.
        child.close_stdin();

        let grace_deadline = deadline.min(Instant::now() + self.grace_window);
        if signalled {
            match child.wait_until(grace_deadline).await {
                Ok(Some(status)) => {
                    let exit = ExitInfo::from(status);
                    info!(session_id = %self.session_id, pid, %exit, "Target exited after termination signal");
                    return SessionStatus::ExitedAfterSignal { exit };
                }
                Ok(None) => {}
                Err(e) => warn!(session_id = %self.session_id, pid, error = %e, "Failed waiting for target exit"),
            }
        }

        let timed_out = Instant::now() >= deadline;
        if timed_out {
            warn!(session_id = %self.session_id, pid, "Session deadline elapsed during grace window, killing target");
        } else {
            warn!(
                session_id = %self.session_id,
                pid,
                grace_window = ?self.grace_window,
                "Target did not exit within grace window, killing"
            );
        }

        self.force_kill(child).await;

        if timed_out {
            SessionStatus::TimedOut
        } else {
            SessionStatus::ForceKilled
        }
    }

    async fn force_kill(&self, child: &mut ChildProcess) {
        let pid = child.pid();
        if let Err(e) = child.start_kill() {
            error!(session_id = %self.session_id, pid, error = %e, "Force kill failed");
        }

        match child.wait_until(Instant::now() + FORCE_KILL_TIMEOUT).await {
            Ok(Some(status)) => debug!(session_id = %self.session_id, pid, %status, "Target reaped after kill"),
            Ok(None) => error!(
                session_id = %self.session_id,
                pid,
                timeout = ?FORCE_KILL_TIMEOUT,
                "Target not reaped after kill; leaving it to the runtime"
            ),
            Err(e) => error!(session_id = %self.session_id, pid, error = %e, "Failed waiting for killed target"),
        }
    }
}
