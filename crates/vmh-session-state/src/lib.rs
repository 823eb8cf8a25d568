use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vmh_common::{HarnessError, HarnessResult};

/// Lifecycle of a single test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session constructed, target not yet launched
    Created,
    /// Target process is running, output pump not yet started
    Launched,
    /// Output pump running, command steps being written
    Sequencing,
    /// Polite signal / grace window / forced kill in progress
    Terminating,
    /// Target reaped and result produced
    Done,
    /// The target could not be launched; nothing to clean up
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Launched => write!(f, "launched"),
            SessionState::Sequencing => write!(f, "sequencing"),
            SessionState::Terminating => write!(f, "terminating"),
            SessionState::Done => write!(f, "done"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: SessionState,
    pub to_state: SessionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Validated state machine for one session.
///
/// Sessions are single-use, so unlike a long-lived supervisor there is no
/// path back out of `Done` or `Failed`.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    session_id: String,
    current_state: SessionState,
    state_history: Vec<StateTransition>,
}

impl SessionStateMachine {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            current_state: SessionState::Created,
            state_history: Vec::new(),
        }
    }

    pub fn current_state(&self) -> SessionState {
        self.current_state
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    /// Check if a transition from the current state to `target_state` is valid
    pub fn is_valid_transition(&self, target_state: SessionState) -> bool {
        matches!(
            (self.current_state, target_state),
            (SessionState::Created, SessionState::Launched)
                | (SessionState::Created, SessionState::Failed)
                | (SessionState::Launched, SessionState::Sequencing)
                // Deadline already gone, or the pump could not be started
                | (SessionState::Launched, SessionState::Terminating)
                | (SessionState::Sequencing, SessionState::Terminating)
                | (SessionState::Terminating, SessionState::Done)
        )
    }

    pub fn transition_to(&mut self, target_state: SessionState, reason: Option<String>) -> HarnessResult<()> {
        if !self.is_valid_transition(target_state) {
            return Err(HarnessError::invalid_state(
                format!("a state that can move to {}", target_state),
                self.current_state.to_string(),
            ));
        }

        let from_state = self.current_state;
        self.state_history.push(StateTransition {
            from_state,
            to_state: target_state,
            timestamp: Utc::now(),
            reason,
        });
        self.current_state = target_state;

        tracing::debug!(
            session_id = %self.session_id,
            from = %from_state,
            to = %target_state,
            "Session state transition"
        );

        Ok(())
    }

    pub fn transition_to_launched(&mut self, pid: u32) -> HarnessResult<()> {
        self.transition_to(SessionState::Launched, Some(format!("Target spawned with pid {}", pid)))
    }

    pub fn transition_to_sequencing(&mut self, steps: usize) -> HarnessResult<()> {
        self.transition_to(SessionState::Sequencing, Some(format!("Running {} command steps", steps)))
    }

    pub fn transition_to_terminating(&mut self, reason: impl Into<String>) -> HarnessResult<()> {
        self.transition_to(SessionState::Terminating, Some(reason.into()))
    }

    pub fn transition_to_done(&mut self, outcome: impl Into<String>) -> HarnessResult<()> {
        self.transition_to(SessionState::Done, Some(outcome.into()))
    }

    pub fn transition_to_failed(&mut self, reason: impl Into<String>) -> HarnessResult<()> {
        self.transition_to(SessionState::Failed, Some(reason.into()))
    }

    /// A session may only be run from its initial state.
    pub fn can_run(&self) -> bool {
        self.current_state == SessionState::Created
    }
}
