//! One integration test run: launch, sequence, terminate, collect.

use crate::config::HarnessConfig;
use crate::protocol::CommandStep;
use crate::sequencer::CommandSequencer;
use crate::termination::TerminationController;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vmh_common::{HarnessError, HarnessResult, SessionStatus};
use vmh_output::{ConsoleEcho, FileSink, OutputBuffer, OutputPump, OutputSink};
use vmh_process::{launch, LaunchSpec};
use vmh_session_state::{SessionState, SessionStateMachine, StateTransition};

/// Time limits of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Overall deadline from launch to reaped target.
    pub timeout: Duration,
    /// Time the target gets to exit after the polite signal.
    pub grace_window: Duration,
    /// Bounded wait for the last output after the target was reaped.
    pub drain_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            grace_window: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

/// Output still in the pipe once the deadline has passed gets this long.
pub const MIN_DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// Drain wait after reaping: `drain_timeout`, cut to what is left of the
/// session deadline but never below [`MIN_DRAIN_WINDOW`].
fn drain_window(drain_timeout: Duration, deadline: Instant) -> Duration {
    let remaining = deadline.saturating_duration_since(Instant::now());
    drain_timeout.min(remaining.max(MIN_DRAIN_WINDOW))
}

/// Why a session that ran to completion is still a failed test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionFailure {
    /// The input stream broke at `step_index`; later steps were skipped.
    CommandWrite { step_index: usize, reason: String },
    /// The overall deadline elapsed during `phase`.
    DeadlineExceeded { phase: String },
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::CommandWrite { step_index, reason } => {
                write!(f, "command write failed at step {}: {}", step_index, reason)
            }
            SessionFailure::DeadlineExceeded { phase } => {
                write!(f, "session deadline exceeded during {}", phase)
            }
        }
    }
}

/// Terminal value of a session. Always carries everything captured.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub captured_output: Vec<u8>,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub steps_completed: usize,
    pub failure: Option<SessionFailure>,
    pub read_errors: Vec<String>,
    pub transitions: Vec<StateTransition>,
}

impl SessionResult {
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.captured_output).into_owned()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Turn a recorded failure into the matching typed error.
    pub fn into_result(self) -> HarnessResult<SessionResult> {
        match self.failure {
            None => Ok(self),
            Some(SessionFailure::CommandWrite { step_index, reason }) => Err(
                HarnessError::command_write(step_index, reason, self.captured_output),
            ),
            Some(SessionFailure::DeadlineExceeded { phase }) => {
                Err(HarnessError::timed_out(phase, self.duration, self.captured_output))
            }
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id.clone(),
            status: self.status,
            started_at: self.started_at,
            duration_ms: self.duration.as_millis() as u64,
            steps_completed: self.steps_completed,
            failure: self.failure.clone(),
            output_bytes: self.captured_output.len(),
            read_errors: self.read_errors.clone(),
            transitions: self.transitions.clone(),
            output: self.output_text(),
        }
    }
}

/// Serialisable summary of a [`SessionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps_completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<SessionFailure>,
    pub output_bytes: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_errors: Vec<String>,
    pub transitions: Vec<StateTransition>,
    pub output: String,
}

/// A single-use test session.
pub struct TestSession {
    id: String,
    spec: LaunchSpec,
    steps: Vec<CommandStep>,
    timing: SessionTiming,
    buffer: OutputBuffer,
    sinks: Vec<Box<dyn OutputSink>>,
    state: SessionStateMachine,
}

impl fmt::Debug for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSession")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("steps", &self.steps.len())
            .field("timing", &self.timing)
            .field("state", &self.state.current_state())
            .finish()
    }
}

impl TestSession {
    pub fn new(
        id: impl Into<String>,
        spec: LaunchSpec,
        steps: Vec<CommandStep>,
        timing: SessionTiming,
    ) -> Self {
        let id = id.into();
        let state = SessionStateMachine::new(&id);
        Self {
            id,
            spec,
            steps,
            timing,
            buffer: OutputBuffer::new(),
            sinks: Vec::new(),
            state,
        }
    }

    /// Build a session from validated configuration, including its
    /// transcript sinks.
    pub fn from_config(config: &HarnessConfig) -> anyhow::Result<Self> {
        let mut session = Self::new(
            config.session.id.clone(),
            config.launch_spec()?,
            config.command_steps()?,
            config.timing(),
        );

        if let Some(ref path) = config.capture.output_file {
            session = session.with_sink(Box::new(FileSink::new(path)?));
        }
        if config.capture.echo {
            session = session.with_sink(Box::new(ConsoleEcho));
        }
        Ok(session)
    }

    /// Mirror captured output to `sink` while the session runs.
    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.current_state()
    }

    pub fn timing(&self) -> SessionTiming {
        self.timing
    }

    /// Shared view of the output buffer, usable while `run` is in progress.
    pub fn output(&self) -> OutputBuffer {
        self.buffer.clone()
    }

    /// Run the session to completion.
    ///
    /// Only a launch failure (or a second call) is returned as an error.
    /// Everything that goes wrong after launch is recorded in the result,
    /// and the target is always reaped before this returns.
    pub async fn run(&mut self) -> HarnessResult<SessionResult> {
        if !self.state.can_run() {
            return Err(HarnessError::invalid_state(
                SessionState::Created.to_string(),
                self.state.current_state().to_string(),
            ));
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + self.timing.timeout;

        info!(
            session_id = %self.id,
            steps = self.steps.len(),
            timeout = ?self.timing.timeout,
            "Starting test session"
        );

        let mut child = match launch(&self.spec) {
            Ok(child) => child,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Failed to launch target");
                self.state.transition_to_failed(e.to_string())?;
                return Err(e);
            }
        };
        self.state.transition_to_launched(child.pid())?;

        // Draining must start before the first command is written.
        let mut pump = OutputPump::new(self.id.clone(), self.buffer.clone());
        for sink in self.sinks.drain(..) {
            pump = pump.with_sink(sink);
        }
        let pump = pump.spawn(child.take_output_streams(), CancellationToken::new());

        self.state.transition_to_sequencing(self.steps.len())?;

        let mut sequencer = CommandSequencer::new(self.id.clone());
        let mut failure = None;
        match child.stdin_mut() {
            Some(stdin) => {
                let outcome =
                    timeout_at(deadline, sequencer.run(&self.steps, stdin, &self.buffer)).await;
                match outcome {
                    Ok(Ok(_)) => {}
                    Ok(Err(HarnessError::CommandWrite {
                        step_index, reason, ..
                    })) => {
                        failure = Some(SessionFailure::CommandWrite { step_index, reason });
                    }
                    Ok(Err(e)) => {
                        failure = Some(SessionFailure::CommandWrite {
                            step_index: sequencer.steps_completed(),
                            reason: e.to_string(),
                        });
                    }
                    Err(_) => {
                        warn!(session_id = %self.id, "Session deadline elapsed while sequencing");
                        failure = Some(SessionFailure::DeadlineExceeded {
                            phase: SessionState::Sequencing.to_string(),
                        });
                    }
                }
            }
            None => {
                failure = Some(SessionFailure::CommandWrite {
                    step_index: 0,
                    reason: "target input stream is not available".to_string(),
                });
            }
        }
        let steps_completed = sequencer.steps_completed();

        let reason = match failure {
            Some(ref failure) => failure.to_string(),
            None => format!("{} steps completed", steps_completed),
        };
        self.state.transition_to_terminating(reason)?;

        let controller = TerminationController::new(self.id.clone(), self.timing.grace_window);
        let status = controller.terminate(&mut child, deadline).await;

        if status == SessionStatus::TimedOut && failure.is_none() {
            failure = Some(SessionFailure::DeadlineExceeded {
                phase: SessionState::Terminating.to_string(),
            });
        }

        let pump_status = pump.finish(drain_window(self.timing.drain_timeout, deadline)).await;
        if !pump_status.reached_eof {
            warn!(
                session_id = %self.id,
                drain_timeout = ?self.timing.drain_timeout,
                "Output did not reach end-of-stream; capture may be incomplete"
            );
        }

        self.state.transition_to_done(status.to_string())?;

        let result = SessionResult {
            session_id: self.id.clone(),
            status,
            captured_output: self.buffer.snapshot(),
            duration: start.elapsed(),
            started_at,
            steps_completed,
            failure,
            read_errors: pump_status.read_errors,
            transitions: self.state.state_history().to_vec(),
        };

        info!(
            session_id = %self.id,
            status = %result.status,
            duration = ?result.duration,
            output_bytes = result.captured_output.len(),
            steps_completed,
            killed = result.status.was_killed(),
            "Test session finished"
        );

        Ok(result)
    }
}
