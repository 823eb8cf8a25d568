//! Custom assertions for E2E tests

use crate::output_parser::OutputParser;
use std::time::Duration;
use vmh_session::SessionResult;
use vmh_common::SessionStatus;

/// Assert that the captured output contains every pattern, in order
pub fn assert_output_sequence(result: &SessionResult, patterns: &[&str]) -> Result<(), String> {
    let parser = OutputParser::new(&result.captured_output);

    if parser.contains_sequence(patterns) {
        Ok(())
    } else {
        parser.print_all();
        Err(format!(
            "Output of session '{}' does not contain {:?} in order",
            result.session_id, patterns
        ))
    }
}

/// Assert that the target reacted to the termination signal on its own
pub fn assert_exited_gracefully(result: &SessionResult) -> Result<(), String> {
    match result.status {
        SessionStatus::ExitedAfterSignal { .. } => Ok(()),
        ref other => Err(format!(
            "Session '{}' expected to exit after the signal, got {}",
            result.session_id, other
        )),
    }
}

/// Assert that the target had to be killed
pub fn assert_force_killed(result: &SessionResult) -> Result<(), String> {
    if result.status == SessionStatus::ForceKilled {
        Ok(())
    } else {
        Err(format!(
            "Session '{}' expected to be force killed, got {}",
            result.session_id, result.status
        ))
    }
}

/// Assert that the whole session stayed within a time bound
pub fn assert_finished_within(result: &SessionResult, bound: Duration) -> Result<(), String> {
    if result.duration <= bound {
        Ok(())
    } else {
        Err(format!(
            "Session '{}' took {:?}, expected at most {:?}",
            result.session_id, result.duration, bound
        ))
    }
}
