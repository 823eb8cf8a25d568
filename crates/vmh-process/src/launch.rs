//! Target process launching.
//!
//! [`launch`] turns an immutable [`LaunchSpec`] into a running
//! [`ChildProcess`] with a piped input stream and one combined output
//! stream. On Unix the child's stdout and stderr are both attached to the
//! write end of a single pipe, so everything the target prints arrives in
//! the order it was written.

use crate::validation::validate_launch_spec;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};
use vmh_common::{HarnessError, HarnessResult};

/// A readable output stream of a launched target.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Immutable description of how to start the target.
///
/// The argument list fully determines the emulator configuration (machine
/// type, CPU flags, memory size, guest image, console routing); the harness
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    executable: String,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    environment: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// A running target process.
///
/// Owns the input stream, the combined output stream(s) until they are
/// handed to the output pump, and the exit status once reaped.
pub struct ChildProcess {
    child: Child,
    pid: u32,
    executable: String,
    stdin: Option<ChildStdin>,
    output: Vec<OutputStream>,
    exit_status: Option<ExitStatus>,
}

impl fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.pid)
            .field("executable", &self.executable)
            .field("stdin_open", &self.stdin.is_some())
            .field("output_streams", &self.output.len())
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

impl ChildProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Mutable access to the input stream, if it is still open.
    pub fn stdin_mut(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    /// Close the input stream. The target sees end-of-file on its stdin.
    pub fn close_stdin(&mut self) {
        if self.stdin.take().is_some() {
            debug!(pid = self.pid, "Closed target input stream");
        }
    }

    /// Hand the output stream(s) over to a reader. Subsequent calls return
    /// an empty vector.
    pub fn take_output_streams(&mut self) -> Vec<OutputStream> {
        std::mem::take(&mut self.output)
    }

    /// Exit status, once the process has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Reap the process if it has already exited, without blocking.
    pub fn try_reap(&mut self) -> HarnessResult<Option<ExitStatus>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }
        let status = self.child.try_wait()?;
        if let Some(status) = status {
            self.record_exit(status);
        }
        Ok(status)
    }

    /// Wait for the process to exit, up to `deadline`.
    ///
    /// Returns `Ok(None)` if the deadline elapsed first; the process is left
    /// running and may be waited on again.
    pub async fn wait_until(&mut self, deadline: Instant) -> HarnessResult<Option<ExitStatus>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }
        match timeout_at(deadline, self.child.wait()).await {
            Ok(result) => {
                let status = result?;
                self.record_exit(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Send the forceful kill signal (SIGKILL on Unix). Does not wait.
    pub fn start_kill(&mut self) -> HarnessResult<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }
        self.child
            .start_kill()
            .map_err(|e| HarnessError::signal(self.pid, format!("kill failed: {}", e)))
    }

    fn record_exit(&mut self, status: ExitStatus) {
        debug!(pid = self.pid, status = %status, "Target process reaped");
        self.exit_status = Some(status);
    }
}

/// Launch the target described by `spec`.
///
/// Must be called from within a tokio runtime. On success the process is
/// running with its input stream and combined output stream open; no output
/// has necessarily been produced yet.
pub fn launch(spec: &LaunchSpec) -> HarnessResult<ChildProcess> {
    info!(command = %spec, "Launching target process");

    let spawn_err = |e: std::io::Error| HarnessError::spawn_failed(spec.executable(), e.to_string());

    validate_launch_spec(spec)
        .map_err(|e| HarnessError::spawn_failed(spec.executable(), e.to_string()))?;

    // The Command (and the parent's copies of the pipe write ends it holds)
    // must be dropped right after spawning, or end-of-stream is never seen.
    let (mut child, output) = {
        let mut cmd = Command::new(spec.executable());
        cmd.args(spec.arguments())
            .envs(spec.environment())
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = spec.cwd() {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            let (reader, writer) = combined_output_pipe().map_err(spawn_err)?;
            let writer_clone = writer.try_clone().map_err(spawn_err)?;
            cmd.stdout(Stdio::from(writer)).stderr(Stdio::from(writer_clone));

            let child = cmd.spawn().map_err(spawn_err)?;
            let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(reader)
                .map_err(spawn_err)?;
            (child, vec![Box::new(receiver) as OutputStream])
        }

        #[cfg(not(unix))]
        {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut child = cmd.spawn().map_err(spawn_err)?;
            let mut output: Vec<OutputStream> = Vec::new();
            if let Some(stdout) = child.stdout.take() {
                output.push(Box::new(stdout));
            }
            if let Some(stderr) = child.stderr.take() {
                output.push(Box::new(stderr));
            }
            (child, output)
        }
    };

    // No pid means the child is already gone; signalling pid 0 would hit
    // our own process group.
    let pid = child.id().ok_or_else(|| {
        HarnessError::spawn_failed(spec.executable(), "spawned process has no pid")
    })?;
    let stdin = child.stdin.take();

    info!(pid, executable = %spec.executable(), "Target process spawned");

    Ok(ChildProcess {
        child,
        pid,
        executable: spec.executable().to_string(),
        stdin,
        output,
        exit_status: None,
    })
}

/// Create the pipe shared by the child's stdout and stderr.
///
/// Both ends are close-on-exec so that concurrently spawned processes never
/// inherit a write end (which would hold end-of-stream open).
#[cfg(unix)]
fn combined_output_pipe() -> std::io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        use nix::fcntl::OFlag;
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(std::io::Error::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::fd::AsRawFd;

        let (reader, writer) = nix::unistd::pipe().map_err(std::io::Error::from)?;
        for fd in [&reader, &writer] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                .map_err(std::io::Error::from)?;
        }
        Ok((reader, writer))
    }
}
