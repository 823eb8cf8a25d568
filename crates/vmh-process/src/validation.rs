//! Launch validation utilities.

use crate::launch::LaunchSpec;
use std::path::Path;
use vmh_common::{HarnessError, HarnessResult};

/// Validate that an executable is plausibly launchable.
///
/// Bare names are resolved through `PATH` at spawn time and are only
/// checked for emptiness; paths containing a separator must exist.
pub fn validate_executable(path: &str) -> HarnessResult<()> {
    if path.trim().is_empty() {
        return Err(HarnessError::configuration("Executable path cannot be empty"));
    }

    if path.contains(std::path::MAIN_SEPARATOR) && !Path::new(path).is_file() {
        return Err(HarnessError::configuration(format!(
            "Executable not found: {}",
            path
        )));
    }

    Ok(())
}

/// Validate a complete launch specification.
pub fn validate_launch_spec(spec: &LaunchSpec) -> HarnessResult<()> {
    validate_executable(spec.executable())?;

    if let Some(dir) = spec.cwd() {
        if !dir.is_dir() {
            return Err(HarnessError::configuration(format!(
                "Working directory does not exist: {}",
                dir.display()
            )));
        }
    }

    Ok(())
}

/// Validate a session identifier.
pub fn validate_identifier(id: &str) -> HarnessResult<()> {
    if id.is_empty() {
        return Err(HarnessError::configuration("Session ID cannot be empty"));
    }

    if id.len() > 64 {
        return Err(HarnessError::configuration(format!(
            "Session ID too long (max 64 characters): {}",
            id
        )));
    }

    if !id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(HarnessError::configuration(format!(
            "Session ID can only contain alphanumeric characters, hyphens, and underscores: {}",
            id
        )));
    }

    Ok(())
}
