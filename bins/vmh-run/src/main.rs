use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use vmh_session::config::parse_duration;
use vmh_session::{HarnessConfig, SessionResult, TestSession};

/// Run one emulator-driven integration test session
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Overall session deadline, e.g. 30s (overrides config)
    #[arg(long, value_parser = parse_duration_arg)]
    timeout: Option<Duration>,

    /// Grace window after the termination signal, e.g. 2s (overrides config)
    #[arg(long, value_parser = parse_duration_arg)]
    grace_window: Option<Duration>,

    /// Also write the captured output to this file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write a YAML session report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries only the target's output
    initialize_logging(args.debug)?;

    info!("Config file: {}", args.config.display());

    let mut config = HarnessConfig::load_from_file(&args.config)?;
    config.apply_overrides(args.timeout, args.grace_window)?;

    let mut session = TestSession::from_config(&config)?;

    let result = tokio::select! {
        result = session.run() => result.context("Session failed to start")?,
        _ = shutdown_signal() => {
            // Dropping the session future kills the target (kill_on_drop)
            warn!("Interrupted, aborting session {}", config.session.id);
            return Ok(ExitCode::from(130));
        }
    };

    emit_output(&result, args.output.as_ref())?;

    if let Some(ref path) = args.report {
        let yaml = serde_yaml::to_string(&result.report()).context("Failed to serialize report")?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    match result.into_result() {
        Ok(result) => {
            info!("Session {} passed ({})", result.session_id, result.status);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Session {} failed: {}", config.session.id, e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn emit_output(result: &SessionResult, output_file: Option<&PathBuf>) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&result.captured_output)
        .and_then(|_| stdout.flush())
        .context("Failed to write captured output")?;

    if let Some(path) = output_file {
        std::fs::write(path, &result.captured_output)
            .with_context(|| format!("Failed to write output file: {}", path.display()))?;
    }
    Ok(())
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                    _ = signal::ctrl_c() => info!("Received SIGINT signal"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                info!("Received SIGINT signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C signal");
    }
}
