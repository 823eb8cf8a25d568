use super::*;
use anyhow::{anyhow, Result};

/// Validate the complete configuration
pub fn validate_config(config: &HarnessConfig) -> Result<()> {
    validate_session_options(&config.session)?;
    validate_launch_sections(config)?;
    validate_protocol(&config.protocol)?;

    if let Some(ref steps) = config.steps {
        validate_steps(steps)?;
    }

    Ok(())
}

fn validate_session_options(options: &SessionOptions) -> Result<()> {
    vmh_process::validate_identifier(&options.id).context("Invalid session id")?;

    if options.timeout.is_zero() {
        return Err(anyhow!("Session timeout must be greater than 0"));
    }

    if options.grace_window.is_zero() {
        return Err(anyhow!("Grace window must be greater than 0"));
    }

    if options.grace_window >= options.timeout {
        return Err(anyhow!(
            "Grace window ({:?}) must be shorter than the session timeout ({:?})",
            options.grace_window,
            options.timeout
        ));
    }

    Ok(())
}

/// Exactly one of `emulator` and `launch`
fn validate_launch_sections(config: &HarnessConfig) -> Result<()> {
    match (&config.emulator, &config.launch) {
        (Some(emulator), None) => validate_emulator(emulator),
        (None, Some(raw)) => {
            if raw.executable.trim().is_empty() {
                return Err(anyhow!("Launch executable cannot be empty"));
            }
            Ok(())
        }
        (Some(_), Some(_)) => Err(anyhow!(
            "Only one of `emulator` or `launch` should be specified"
        )),
        (None, None) => Err(anyhow!("Either `emulator` or `launch` must be specified")),
    }
}

fn validate_emulator(emulator: &EmulatorConfig) -> Result<()> {
    if emulator.executable.trim().is_empty() {
        return Err(anyhow!("Emulator executable cannot be empty"));
    }

    if emulator.kernel.trim().is_empty() {
        return Err(anyhow!("Emulator kernel image cannot be empty"));
    }

    if emulator.smp == 0 {
        return Err(anyhow!("Emulator smp must be at least 1"));
    }

    if emulator.memory.trim().is_empty() {
        return Err(anyhow!("Emulator memory size cannot be empty"));
    }

    Ok(())
}

fn validate_protocol(protocol: &ProtocolConfig) -> Result<()> {
    if protocol.escape.is_empty() {
        return Err(anyhow!("Monitor escape sequence cannot be empty"));
    }
    Ok(())
}

fn validate_steps(steps: &[StepConfig]) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        match step {
            StepConfig::Command { text, .. } => {
                if text.is_empty() {
                    return Err(anyhow!("Step {}: command text cannot be empty", index));
                }
                if text.contains('\n') {
                    return Err(anyhow!(
                        "Step {}: command text must not contain a newline (one is appended): {:?}",
                        index,
                        text
                    ));
                }
            }
            StepConfig::Send { text, .. } => {
                if text.is_empty() {
                    return Err(anyhow!("Step {}: send text cannot be empty", index));
                }
            }
            StepConfig::Pause { .. } | StepConfig::Escape { .. } => {}
        }
    }
    Ok(())
}
