use crate::protocol::{default_monitor_script, CommandStep, MonitorProtocol};
use crate::session::SessionTiming;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vmh_process::LaunchSpec;

pub mod validation;

pub use duration_serde::parse_duration;

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub session: SessionOptions,

    /// Structured emulator launch; exclusive with `launch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator: Option<EmulatorConfig>,

    /// Raw command line; exclusive with `emulator`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<RawLaunchConfig>,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Command script. When absent the default monitor script runs.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub steps: Option<Vec<StepConfig>>,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Session identity and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    pub id: String,

    /// Overall deadline covering launch, sequencing and termination
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    #[serde(default = "default_grace_window", with = "duration_serde")]
    pub grace_window: Duration,

    /// How long to keep draining output after the target was reaped
    #[serde(default = "default_drain_timeout", with = "duration_serde")]
    pub drain_timeout: Duration,
}

/// Emulator command line, built into a [`LaunchSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default = "default_emulator_executable")]
    pub executable: String,
    #[serde(default = "default_machine")]
    pub machine: String,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_bios")]
    pub bios: String,
    #[serde(default = "default_smp")]
    pub smp: u32,
    #[serde(default = "default_memory")]
    pub memory: String,
    /// Guest image loaded with `-kernel`
    pub kernel: String,
    #[serde(default = "default_true")]
    pub nographic: bool,
    /// Console routing; `mon:stdio` multiplexes console and monitor on stdio
    #[serde(default = "default_serial")]
    pub serial: String,
    #[serde(default = "default_true")]
    pub no_reboot: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Arbitrary target command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLaunchConfig {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Monitor escape sequence as text
    #[serde(default = "default_escape")]
    pub escape: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            escape: default_escape(),
        }
    }
}

/// One scripted step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConfig {
    Pause {
        #[serde(with = "duration_serde")]
        duration: Duration,
    },
    Escape {
        #[serde(default = "default_escape_settle", with = "duration_serde")]
        settle: Duration,
    },
    /// Monitor command; a newline is appended
    Command {
        text: String,
        #[serde(default = "default_command_settle", with = "duration_serde")]
        settle: Duration,
    },
    /// Raw text, sent as is
    Send {
        text: String,
        #[serde(default = "default_send_settle", with = "duration_serde")]
        settle: Duration,
    },
}

impl StepConfig {
    pub fn to_step(&self, protocol: &MonitorProtocol) -> CommandStep {
        match self {
            StepConfig::Pause { duration } => CommandStep::pause(*duration),
            StepConfig::Escape { settle } => CommandStep::break_into_monitor(protocol, *settle),
            StepConfig::Command { text, settle } => CommandStep::monitor_command(text, *settle),
            StepConfig::Send { text, settle } => CommandStep::send(text.as_bytes(), *settle),
        }
    }
}

/// Where captured output is mirrored while the session runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub echo: bool,
}

impl EmulatorConfig {
    /// Emulator command line, in the order QEMU documents its options.
    pub fn to_launch_spec(&self) -> LaunchSpec {
        let mut spec = LaunchSpec::new(&self.executable)
            .arg("-machine")
            .arg(&self.machine)
            .arg("-cpu")
            .arg(&self.cpu)
            .arg("-bios")
            .arg(&self.bios)
            .arg("-smp")
            .arg(self.smp.to_string())
            .arg("-m")
            .arg(&self.memory);

        if self.nographic {
            spec = spec.arg("-nographic");
        }
        spec = spec.arg("-serial").arg(&self.serial);
        if self.no_reboot {
            spec = spec.arg("--no-reboot");
        }

        spec = spec.args(&self.extra_args).arg("-kernel").arg(&self.kernel);

        if let Some(ref dir) = self.working_directory {
            spec = spec.working_directory(dir);
        }
        for (key, value) in &self.environment {
            spec = spec.env(key, value);
        }
        spec
    }
}

impl RawLaunchConfig {
    pub fn to_launch_spec(&self) -> LaunchSpec {
        let mut spec = LaunchSpec::new(&self.executable).args(&self.args);
        if let Some(ref dir) = self.working_directory {
            spec = spec.working_directory(dir);
        }
        for (key, value) in &self.environment {
            spec = spec.env(key, value);
        }
        spec
    }
}

impl HarnessConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<Self> {
        let config: HarnessConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Replace timing values from the command line, then re-validate.
    pub fn apply_overrides(
        &mut self,
        timeout: Option<Duration>,
        grace_window: Option<Duration>,
    ) -> Result<()> {
        if let Some(timeout) = timeout {
            self.session.timeout = timeout;
        }
        if let Some(grace_window) = grace_window {
            self.session.grace_window = grace_window;
        }
        self.validate()
    }

    /// Launch specification for whichever launch section is present.
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        match (&self.emulator, &self.launch) {
            (Some(emulator), None) => Ok(emulator.to_launch_spec()),
            (None, Some(raw)) => Ok(raw.to_launch_spec()),
            _ => Err(anyhow::anyhow!(
                "Exactly one of `emulator` or `launch` must be configured"
            )),
        }
    }

    pub fn protocol(&self) -> Result<MonitorProtocol> {
        MonitorProtocol::with_escape(self.protocol.escape.as_bytes())
            .context("Invalid protocol configuration")
    }

    pub fn command_steps(&self) -> Result<Vec<CommandStep>> {
        let protocol = self.protocol()?;
        Ok(match self.steps {
            Some(ref steps) => steps.iter().map(|s| s.to_step(&protocol)).collect(),
            None => default_monitor_script(&protocol),
        })
    }

    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            timeout: self.session.timeout,
            grace_window: self.session.grace_window,
            drain_timeout: self.session.drain_timeout,
        }
    }
}

// Default value functions
fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_grace_window() -> Duration {
    Duration::from_secs(2)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_emulator_executable() -> String {
    "qemu-system-riscv64".to_string()
}

fn default_machine() -> String {
    "virt".to_string()
}

fn default_cpu() -> String {
    "rv64,h=true".to_string()
}

fn default_bios() -> String {
    "default".to_string()
}

fn default_smp() -> u32 {
    1
}

fn default_memory() -> String {
    "128M".to_string()
}

fn default_serial() -> String {
    "mon:stdio".to_string()
}

fn default_true() -> bool {
    true
}

fn default_escape() -> String {
    "\u{1}c".to_string()
}

fn default_escape_settle() -> Duration {
    Duration::from_millis(100)
}

fn default_command_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_send_settle() -> Duration {
    Duration::from_millis(100)
}

// Durations are written with a unit suffix: "250ms", "2s", "1m"
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let parse = |num: &str| -> Result<u64, String> {
            num.trim().parse().map_err(|_| format!("Invalid duration: {}", s))
        };

        // "ms" before "s", since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            Ok(Duration::from_millis(parse(num)?))
        } else if let Some(num) = s.strip_suffix('s') {
            Ok(Duration::from_secs(parse(num)?))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins = parse(num)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("Duration too large: {}", s))
        } else {
            Err(format!("Duration must end with 'ms', 's', or 'm': {}", s))
        }
    }
}
