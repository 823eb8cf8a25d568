//! Scenario: target ignores the termination signal
//!
//! TESTEXE runs with `--ignore-sigterm`; the harness must give up after
//! the grace window, kill it, and still return everything it printed.
#![cfg(unix)]

use e2e_tests::assertions::{assert_finished_within, assert_force_killed, assert_output_sequence};
use e2e_tests::{TestExecutor, TestSessionOptions};
use std::time::Duration;
use vmh_common::SessionStatus;
use vmh_session::{CommandStep, MonitorProtocol};

const TESTEXE: &str = env!("CARGO_BIN_EXE_testexe");

#[tokio::test]
async fn test_forced_stop() {
    println!("\n========================================");
    println!("TEST: Forced Stop");
    println!("========================================\n");

    let executor = TestExecutor::new("forced-stop", TESTEXE).unwrap();
    let protocol = MonitorProtocol::qemu();

    let options = TestSessionOptions {
        testexe_args: vec!["--ignore-sigterm".to_string()],
        grace_window_ms: 500,
        ..Default::default()
    };
    let steps = vec![
        CommandStep::break_into_monitor(&protocol, Duration::from_millis(100)),
        CommandStep::monitor_command("ping", Duration::from_millis(200)),
    ];

    let result = executor.run_session(options, steps).await.unwrap();

    assert_force_killed(&result).unwrap();
    assert_output_sequence(&result, &["READY", "pong"]).unwrap();
    // steps + grace window + forced kill + drain, with slack
    assert_finished_within(&result, Duration::from_secs(4)).unwrap();
    assert!(result.is_success());

    println!("✓ TEST PASSED: Forced Stop");
}

#[tokio::test]
async fn test_graceful_stop() {
    let executor = TestExecutor::new("graceful-stop", TESTEXE).unwrap();

    let result = executor
        .run_session(
            TestSessionOptions::default(),
            vec![CommandStep::pause(Duration::from_millis(200))],
        )
        .await
        .unwrap();

    match result.status {
        SessionStatus::ExitedAfterSignal { exit } => assert_eq!(exit.code, Some(0)),
        ref other => panic!("Unexpected status: {}", other),
    }
    assert_output_sequence(&result, &["READY", "testexe: terminating"]).unwrap();
}

#[tokio::test]
async fn test_exit_before_signal() {
    let executor = TestExecutor::new("exit-early", TESTEXE).unwrap();

    let options = TestSessionOptions {
        testexe_args: vec!["--exit-immediately".to_string(), "--exit-code".to_string(), "3".to_string()],
        ..Default::default()
    };
    let result = executor
        .run_session(options, vec![CommandStep::pause(Duration::from_millis(500))])
        .await
        .unwrap();

    match result.status {
        SessionStatus::ExitedBeforeSignal { exit } => assert_eq!(exit.code, Some(3)),
        ref other => panic!("Unexpected status: {}", other),
    }
    assert!(result.output_text().ends_with("READY\n"));
}

#[tokio::test]
async fn test_deadline_bounds_stubborn_target() {
    let executor = TestExecutor::new("deadline", TESTEXE).unwrap();

    let options = TestSessionOptions {
        testexe_args: vec!["--ignore-sigterm".to_string()],
        timeout_ms: 800,
        grace_window_ms: 300,
        ..Default::default()
    };
    let result = executor
        .run_session(options, vec![CommandStep::pause(Duration::from_secs(30))])
        .await
        .unwrap();

    assert_eq!(result.status, SessionStatus::TimedOut);
    assert!(result.failure.is_some());
    assert!(!result.is_success());
    assert_finished_within(&result, Duration::from_secs(4)).unwrap();
    assert_output_sequence(&result, &["READY"]).unwrap();
}
