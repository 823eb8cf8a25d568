//! Control-channel protocol: the monitor escape and the command steps sent
//! over the target's input stream.

use std::fmt;
use std::time::Duration;
use vmh_common::{HarnessError, HarnessResult};

/// QEMU's "switch console to monitor" sequence: Ctrl-A followed by `c`.
pub const QEMU_MONITOR_ESCAPE: [u8; 2] = [0x01, b'c'];

/// Conventions of the emulator's monitor mode.
///
/// The escape sequence belongs here rather than in the sequencer so that a
/// different emulator can be driven by swapping the protocol value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorProtocol {
    escape: Vec<u8>,
}

impl MonitorProtocol {
    pub fn qemu() -> Self {
        Self {
            escape: QEMU_MONITOR_ESCAPE.to_vec(),
        }
    }

    pub fn with_escape(escape: impl Into<Vec<u8>>) -> HarnessResult<Self> {
        let escape = escape.into();
        if escape.is_empty() {
            return Err(HarnessError::configuration("monitor escape sequence cannot be empty"));
        }
        Ok(Self { escape })
    }

    pub fn escape(&self) -> &[u8] {
        &self.escape
    }
}

impl Default for MonitorProtocol {
    fn default() -> Self {
        Self::qemu()
    }
}

/// One entry of a command script: bytes to write, then a delay before the
/// next step may run. A step with an empty payload is a plain pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    payload: Vec<u8>,
    settle: Duration,
}

impl CommandStep {
    pub fn new(payload: impl Into<Vec<u8>>, settle: Duration) -> Self {
        Self {
            payload: payload.into(),
            settle,
        }
    }

    /// Write nothing, only wait.
    pub fn pause(duration: Duration) -> Self {
        Self::new(Vec::new(), duration)
    }

    /// Write `bytes` exactly as given.
    pub fn send(bytes: impl Into<Vec<u8>>, settle: Duration) -> Self {
        Self::new(bytes, settle)
    }

    /// Send the protocol's escape to switch the console into monitor mode.
    pub fn break_into_monitor(protocol: &MonitorProtocol, settle: Duration) -> Self {
        Self::new(protocol.escape(), settle)
    }

    /// A newline-terminated monitor command.
    pub fn monitor_command(text: &str, settle: Duration) -> Self {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(b'\n');
        Self::new(payload, settle)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn is_pause(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for CommandStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pause() {
            return write!(f, "pause {:?}", self.settle);
        }
        write!(f, "send \"{}\" then settle {:?}", self.payload.escape_ascii(), self.settle)
    }
}

/// Boot pause, break into the monitor, dump the registers.
pub fn default_monitor_script(protocol: &MonitorProtocol) -> Vec<CommandStep> {
    vec![
        CommandStep::pause(Duration::from_secs(2)),
        CommandStep::break_into_monitor(protocol, Duration::from_millis(100)),
        CommandStep::monitor_command("info registers", Duration::from_millis(500)),
    ]
}
