use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TARGET_URL: &str = "ws://localhost:3001";
pub const DEFAULT_DEVICE_COUNT: u32 = 50;
pub const DEFAULT_DEVICE_PREFIX: &str = "device_";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub target: TargetConfig,
    pub fleet: FleetConfig,
    pub session: SessionConfig,
    pub policy: PolicyConfig,
    pub payload: PayloadConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(
        path: impl AsRef<Path>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let data = fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // An empty document deserializes to unit, not to an empty mapping.
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Layers command-line values over this config. Unset fields leave the
    /// loaded value alone.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(devices) = overrides.devices {
            self.fleet.devices = devices;
        }
        if let Some(url) = &overrides.url {
            self.target.url = url.clone();
        }
        if let Some(concurrency) = overrides.concurrency {
            self.fleet.concurrency = concurrency;
        }
        if let Some(hold_ms) = overrides.hold_ms {
            self.session.hold_ms = hold_ms;
        }
        if let Some(ms) = overrides.connect_timeout_ms {
            self.session.connect_timeout_ms = ms;
        }
        if overrides.fail_fast {
            self.policy.failure_mode = FailureMode::FailFast;
        }
        if overrides.lenient {
            self.policy.strict_exit = false;
        }
        if overrides.json_logs {
            self.logging.json = true;
        }
    }
}

/// Values given on the command line. Switches only ever turn a setting on.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub devices: Option<u32>,
    pub url: Option<String>,
    pub concurrency: Option<usize>,
    pub hold_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub fail_fast: bool,
    pub lenient: bool,
    pub json_logs: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// WebSocket endpoint every simulated device connects to.
    pub url: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_TARGET_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub devices: u32,
    /// Maximum simultaneous sessions. Zero gives every device its own slot.
    pub concurrency: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            devices: DEFAULT_DEVICE_COUNT,
            concurrency: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// How long a device lingers after its frame is sent.
    pub hold_ms: u64,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

impl SessionConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hold_ms: 5_000,
            connect_timeout_ms: 10_000,
            send_timeout_ms: 5_000,
            close_timeout_ms: 2_000,
        }
    }
}

/// What the coordinator does once a device fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Every device runs to completion regardless of sibling failures.
    #[default]
    BestEffort,
    /// The first failure cancels in-flight sessions and skips the rest.
    FailFast,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub failure_mode: FailureMode,
    /// Exit non-zero when any device did not complete its session.
    pub strict_exit: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::BestEffort,
            strict_exit: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PayloadConfig {
    pub device_prefix: String,
    /// Replaces the built-in sensor readings when present.
    pub fields: Option<BTreeMap<String, i64>>,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            device_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            fields: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human readable format.
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}
