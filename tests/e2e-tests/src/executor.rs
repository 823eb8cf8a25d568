use std::path::{Path, PathBuf};
use std::time::Duration;
use vmh_process::LaunchSpec;
use vmh_session::{CommandStep, HarnessConfig, SessionResult, SessionTiming, TestSession};

use crate::{create_test_dir, resolve_testexe};

/// Per-scenario knobs for a TESTEXE session
#[derive(Debug, Clone)]
pub struct TestSessionOptions {
    pub testexe_args: Vec<String>,
    pub timeout_ms: u64,
    pub grace_window_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for TestSessionOptions {
    fn default() -> Self {
        Self {
            testexe_args: vec![],
            timeout_ms: 20_000,
            grace_window_ms: 2_000,
            drain_timeout_ms: 1_000,
        }
    }
}

impl TestSessionOptions {
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            timeout: Duration::from_millis(self.timeout_ms),
            grace_window: Duration::from_millis(self.grace_window_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}

/// High-level test executor that owns the scratch directory and the
/// TESTEXE location for one scenario
pub struct TestExecutor {
    pub test_name: String,
    pub testexe_path: PathBuf,
    test_dir: tempfile::TempDir,
}

impl TestExecutor {
    /// Create a new test executor
    pub fn new(test_name: &str, testexe: &str) -> Result<Self, String> {
        let test_dir = create_test_dir(test_name)
            .map_err(|e| format!("Failed to create test directory: {}", e))?;
        let testexe_path = resolve_testexe(testexe)?;

        println!("=== Test Executor Setup ===");
        println!("Test: {}", test_name);
        println!("Test dir: {}", test_dir.path().display());
        println!("TESTEXE: {}", testexe_path.display());
        println!("===========================\n");

        Ok(Self {
            test_name: test_name.to_string(),
            testexe_path,
            test_dir,
        })
    }

    pub fn test_dir(&self) -> &Path {
        self.test_dir.path()
    }

    /// Launch spec for TESTEXE with the given extra arguments
    pub fn launch_spec(&self, testexe_args: &[String]) -> LaunchSpec {
        LaunchSpec::new(self.testexe_path.to_string_lossy())
            .args(testexe_args.iter().cloned())
            .env("TESTEXE_LOG", "off")
    }

    /// Run one session against TESTEXE and return its result
    pub async fn run_session(
        &self,
        options: TestSessionOptions,
        steps: Vec<CommandStep>,
    ) -> Result<SessionResult, String> {
        let spec = self.launch_spec(&options.testexe_args);
        let mut session = TestSession::new(&self.test_name, spec, steps, options.timing());

        let result = session
            .run()
            .await
            .map_err(|e| format!("Session failed to run: {}", e))?;

        println!(
            "Session '{}' finished: status={}, steps={}, output={} bytes, took {:?}",
            result.session_id,
            result.status,
            result.steps_completed,
            result.captured_output.len(),
            result.duration
        );
        Ok(result)
    }

    /// Write a YAML config into the test directory, load it and run it
    pub async fn run_config(&self, yaml: &str) -> Result<SessionResult, String> {
        let config_path = self.test_dir().join("session.yaml");
        std::fs::write(&config_path, yaml)
            .map_err(|e| format!("Failed to write config: {}", e))?;

        let config = HarnessConfig::load_from_file(&config_path)
            .map_err(|e| format!("Failed to load config: {:#}", e))?;
        let mut session = TestSession::from_config(&config)
            .map_err(|e| format!("Failed to build session: {:#}", e))?;

        session
            .run()
            .await
            .map_err(|e| format!("Session failed to run: {}", e))
    }
}
