//! Scenario: target closes its input mid-script
//!
//! TESTEXE closes stdin after the first line. The second write must fail
//! with the step index and the output captured so far, and the target
//! must still be terminated.
#![cfg(unix)]

use e2e_tests::assertions::assert_output_sequence;
use e2e_tests::{TestExecutor, TestSessionOptions};
use std::time::Duration;
use vmh_common::HarnessError;
use vmh_session::{CommandStep, SessionFailure};

const TESTEXE: &str = env!("CARGO_BIN_EXE_testexe");

#[tokio::test]
async fn test_write_failure_reports_step() {
    println!("\n========================================");
    println!("TEST: Broken Input");
    println!("========================================\n");

    let executor = TestExecutor::new("broken-input", TESTEXE).unwrap();

    let options = TestSessionOptions {
        testexe_args: vec!["--close-stdin-after".to_string(), "1".to_string()],
        ..Default::default()
    };
    let steps = vec![
        CommandStep::send("first\n", Duration::from_millis(300)),
        CommandStep::send("second\n", Duration::from_millis(100)),
        CommandStep::send("third\n", Duration::from_millis(100)),
    ];

    let result = executor.run_session(options, steps).await.unwrap();

    assert_eq!(result.steps_completed, 1);
    match result.failure {
        Some(SessionFailure::CommandWrite { step_index, .. }) => assert_eq!(step_index, 1),
        ref other => panic!("Unexpected failure: {:?}", other),
    }
    assert_output_sequence(&result, &["READY", "guest: first"]).unwrap();
    // TESTEXE still honours SIGTERM after losing its input
    assert!(result.status.exit_info().is_some());

    let err = result.into_result().unwrap_err();
    match err {
        HarnessError::CommandWrite {
            step_index,
            ref captured_output,
            ..
        } => {
            assert_eq!(step_index, 1);
            assert!(String::from_utf8_lossy(captured_output).contains("guest: first"));
        }
        other => panic!("Unexpected error: {}", other),
    }

    println!("✓ TEST PASSED: Broken Input");
}
