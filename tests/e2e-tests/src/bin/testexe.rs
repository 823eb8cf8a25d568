//! Fake emulator for end-to-end harness tests.
//!
//! Behaves like `qemu-system-* -nographic -serial mon:stdio` as far as the
//! harness can tell: prints a boot banner and `READY`, switches to a
//! `(qemu) ` monitor prompt on Ctrl-A `c`, and answers a few monitor
//! commands. QEMU-style arguments are accepted and ignored.

use clap::Parser;
use std::io::{Read, Write};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MONITOR_BANNER: &str = "\nQEMU 8.2.0 monitor - type 'help' for more information\n";
const MONITOR_PROMPT: &str = "(qemu) ";

const REGISTER_DUMP: &str = "\
pc       0000000080200000
mhartid  0000000000000000
mstatus  0000000a00000080
hstatus  0000000200000000
x0/zero  0000000000000000 x1/ra    0000000080200010 x2/sp    0000000080400000
";

/// Fake emulator for VM harness testing
#[derive(Parser, Debug)]
#[command(name = "testexe")]
#[command(about = "Fake emulator for VM harness testing", long_about = None)]
struct Args {
    /// Ignore SIGTERM (only SIGKILL ends the process)
    #[arg(long)]
    ignore_sigterm: bool,

    /// Print the banner and exit without reading input
    #[arg(long)]
    exit_immediately: bool,

    /// Exit code used by --exit-immediately
    #[arg(long, default_value = "0")]
    exit_code: u8,

    /// Close the input stream after this many lines and keep running
    #[arg(long)]
    close_stdin_after: Option<usize>,

    /// Emit this many bytes of console output right after READY
    #[arg(long, default_value = "0")]
    burst_bytes: usize,

    /// Delay before printing READY
    #[arg(long, default_value = "0")]
    boot_delay_ms: u64,

    /// QEMU command line (ignored)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    emulator_args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Everything on stderr ends up in the harness capture, so stay quiet
    // unless asked.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TESTEXE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    debug!("Starting testexe with args: {:?}", args);

    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            return ExitCode::FAILURE;
        }
    };

    emit("OpenSBI v1.3 (testexe)\n");
    emit("Hypervisor booting...\n");
    if args.boot_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.boot_delay_ms)).await;
    }
    emit("READY\n");

    if args.burst_bytes > 0 {
        emit_burst(args.burst_bytes);
        emit("\nBURST DONE\n");
    }

    if args.exit_immediately {
        info!("Exiting immediately with code {}", args.exit_code);
        return ExitCode::from(args.exit_code);
    }

    let mut input = spawn_stdin_reader(args.close_stdin_after);
    let mut console = Console::default();
    let mut stdin_open = true;

    loop {
        #[cfg(unix)]
        let terminated = sigterm.recv();
        #[cfg(not(unix))]
        let terminated = tokio::signal::ctrl_c();

        tokio::select! {
            chunk = input.recv(), if stdin_open => match chunk {
                Some(bytes) => {
                    if console.feed(&bytes) == Flow::Quit {
                        info!("Monitor quit");
                        return ExitCode::SUCCESS;
                    }
                }
                None => {
                    debug!("Input stream closed");
                    stdin_open = false;
                }
            },
            _ = terminated => {
                if args.ignore_sigterm {
                    warn!("Ignoring termination signal");
                } else {
                    info!("Received termination signal");
                    emit("testexe: terminating\n");
                    return ExitCode::SUCCESS;
                }
            }
        }
    }
}

/// Read stdin on a plain thread so closing fd 0 never races a pending read.
fn spawn_stdin_reader(close_after_lines: Option<usize>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);

    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        let mut lines = 0usize;

        loop {
            let n = match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            let chunk = &buf[..n];
            lines += chunk.iter().filter(|b| **b == b'\n').count();

            if tx.blocking_send(chunk.to_vec()).is_err() {
                break;
            }

            if close_after_lines.map_or(false, |limit| lines >= limit) {
                close_stdin();
                // Keep the sender alive so the main loop does not treat
                // this as end-of-input.
                loop {
                    std::thread::park();
                }
            }
        }
    });

    rx
}

#[cfg(unix)]
fn close_stdin() {
    if let Err(e) = nix::unistd::close(0) {
        warn!("Failed to close stdin: {}", e);
    }
}

#[cfg(not(unix))]
fn close_stdin() {}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Console / monitor multiplexer, fed with raw input bytes.
#[derive(Default)]
struct Console {
    monitor: bool,
    pending_ctrl_a: bool,
    line: Vec<u8>,
}

impl Console {
    fn feed(&mut self, bytes: &[u8]) -> Flow {
        for &b in bytes {
            if self.pending_ctrl_a {
                self.pending_ctrl_a = false;
                if b == b'c' {
                    self.toggle_monitor();
                    continue;
                }
            }

            match b {
                0x01 => self.pending_ctrl_a = true,
                b'\r' => {}
                b'\n' => {
                    let line = std::mem::take(&mut self.line);
                    if self.handle_line(&String::from_utf8_lossy(&line)) == Flow::Quit {
                        return Flow::Quit;
                    }
                }
                other => self.line.push(other),
            }
        }
        Flow::Continue
    }

    fn toggle_monitor(&mut self) {
        self.monitor = !self.monitor;
        self.line.clear();
        if self.monitor {
            emit(MONITOR_BANNER);
            emit(MONITOR_PROMPT);
        } else {
            emit("\n");
        }
    }

    fn handle_line(&mut self, line: &str) -> Flow {
        let command = line.trim();

        if !self.monitor {
            match command {
                "" => {}
                "ping" => emit("pong\n"),
                other => emit(&format!("guest: {}\n", other)),
            }
            return Flow::Continue;
        }

        match command {
            "" => {}
            "ping" => emit("pong\n"),
            "info registers" => emit(REGISTER_DUMP),
            "info status" => emit("VM status: running\n"),
            "quit" | "q" => return Flow::Quit,
            other => emit(&format!("unknown command: '{}'\n", other)),
        }
        emit(MONITOR_PROMPT);
        Flow::Continue
    }
}

fn emit(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn emit_burst(total: usize) {
    const PATTERN: &[u8] = b"0123456789abcdef";
    let mut stdout = std::io::stdout().lock();
    let mut remaining = total;
    let mut chunk = Vec::with_capacity(4096);
    while remaining > 0 {
        chunk.clear();
        while chunk.len() < 4096 && chunk.len() < remaining {
            chunk.push(PATTERN[(total - remaining + chunk.len()) % PATTERN.len()]);
        }
        if stdout.write_all(&chunk).is_err() {
            return;
        }
        remaining -= chunk.len();
    }
    let _ = stdout.flush();
}
