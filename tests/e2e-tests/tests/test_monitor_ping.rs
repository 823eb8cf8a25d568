//! Scenario: break into the monitor, ping, read the reply
//!
//! The canonical harness round trip: TESTEXE boots, the harness sends the
//! monitor escape and a `ping` command, and the reply shows up in the
//! captured output after the boot banner.
#![cfg(unix)]

use e2e_tests::assertions::{assert_exited_gracefully, assert_output_sequence};
use e2e_tests::{OutputParser, TestExecutor, TestSessionOptions};
use std::time::Duration;
use vmh_session::{CommandStep, MonitorProtocol};

const TESTEXE: &str = env!("CARGO_BIN_EXE_testexe");

fn ping_script() -> Vec<CommandStep> {
    let protocol = MonitorProtocol::qemu();
    vec![
        CommandStep::pause(Duration::from_millis(200)),
        CommandStep::break_into_monitor(&protocol, Duration::from_millis(100)),
        CommandStep::monitor_command("ping", Duration::from_millis(300)),
    ]
}

#[tokio::test]
async fn test_monitor_ping() {
    println!("\n========================================");
    println!("TEST: Monitor Ping");
    println!("========================================\n");

    let executor = TestExecutor::new("monitor-ping", TESTEXE).unwrap();

    let result = executor
        .run_session(TestSessionOptions::default(), ping_script())
        .await
        .unwrap();

    assert_output_sequence(&result, &["READY", "(qemu)", "pong", "(qemu)"]).unwrap();
    assert_exited_gracefully(&result).unwrap();
    assert_eq!(result.steps_completed, 3);
    assert!(result.failure.is_none());
    assert!(result.is_success());

    println!("✓ TEST PASSED: Monitor Ping");
}

#[tokio::test]
async fn test_identical_sessions_capture_identical_output() {
    let executor = TestExecutor::new("monitor-ping-repeat", TESTEXE).unwrap();

    let first = executor
        .run_session(TestSessionOptions::default(), ping_script())
        .await
        .unwrap();
    let second = executor
        .run_session(TestSessionOptions::default(), ping_script())
        .await
        .unwrap();

    assert_eq!(first.captured_output, second.captured_output);
    assert_eq!(OutputParser::new(&first.captured_output).count_occurrences("pong"), 1);
}

#[tokio::test]
async fn test_console_lines_reach_guest() {
    let executor = TestExecutor::new("console-lines", TESTEXE).unwrap();

    let steps = vec![
        CommandStep::send("hello\n", Duration::from_millis(100)),
        CommandStep::send("ping\n", Duration::from_millis(200)),
    ];
    let result = executor
        .run_session(TestSessionOptions::default(), steps)
        .await
        .unwrap();

    // Without the escape TESTEXE stays in console mode
    assert_output_sequence(&result, &["READY", "guest: hello", "pong"]).unwrap();
    assert!(!OutputParser::new(&result.captured_output).contains("(qemu)"));
}
