//! Configuration loading and typed config structures for the slave clock.
//!
//! The canonical configuration lives in `slaveclock.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, a loader
//! that reads the file, and a validator that rejects timing combinations
//! the hardware cannot honor (a pulse at least as long as its interval).
//!
//! Every field has a default matching the reference wiring: relay A on
//! GPIO26, relay B on GPIO20, active-low relay board.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes impossible timing.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level controller configuration.
///
/// Mirrors the structure of `slaveclock.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Relay wiring and backend.
    #[serde(default)]
    pub relays: RelayConfig,

    /// Pulse widths, intervals, and fast-set safety caps.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Where the offset record is persisted.
    #[serde(default)]
    pub state: StateConfig,

    /// Control API listener.
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClockConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `SLAVECLOCK_STATE_PATH` overrides `state.path`
    /// - `SLAVECLOCK_API_PORT` overrides `api.port`
    /// - `SLAVECLOCK_RELAY_BACKEND` overrides `relays.backend`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// Environment overrides are not applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored and the configured value kept.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SLAVECLOCK_STATE_PATH") {
            self.state.path = path;
        }
        if let Some(port) = lookup("SLAVECLOCK_API_PORT").and_then(|p| p.parse().ok()) {
            self.api.port = port;
        }
        if let Some(backend) = lookup("SLAVECLOCK_RELAY_BACKEND") {
            match backend.to_lowercase().as_str() {
                "sysfs" => self.relays.backend = RelayBackend::Sysfs,
                "simulated" => self.relays.backend = RelayBackend::Simulated,
                other => tracing::warn!(backend = other, "Ignoring unknown relay backend override"),
            }
        }
    }

    /// Check that the timing is physically achievable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_owned(),
            })
        };

        if t.minute_pulse_width_ms == 0 {
            return invalid("timing.minute_pulse_width_ms must be positive");
        }
        if t.correction_pulses == 0 {
            return invalid("timing.correction_pulses must be at least 1");
        }
        if t.correction_pulse_width_ms == 0
            || t.correction_pulse_width_ms >= t.correction_interval_ms
        {
            return invalid(
                "timing.correction_pulse_width_ms must be positive and less than correction_interval_ms",
            );
        }
        if t.fast_set_pulse_width_ms == 0 || t.fast_set_pulse_width_ms >= t.fast_set_interval_ms {
            return invalid(
                "timing.fast_set_pulse_width_ms must be positive and less than fast_set_interval_ms",
            );
        }
        if t.fast_set_max_pulses == 0 || t.fast_set_max_seconds == 0 {
            return invalid("timing.fast_set_max_pulses and fast_set_max_seconds must be positive");
        }
        if self.relays.line_a_gpio == self.relays.line_b_gpio {
            return invalid("relays.line_a_gpio and relays.line_b_gpio must differ");
        }
        Ok(())
    }
}

/// Which pin implementation drives the relays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    /// Linux sysfs GPIO (`/sys/class/gpio`).
    #[default]
    Sysfs,
    /// In-memory pins; nothing is switched. Useful away from the clock.
    Simulated,
}

/// Relay wiring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// GPIO number of the relay closing line A to common.
    #[serde(default = "default_line_a_gpio")]
    pub line_a_gpio: u32,

    /// GPIO number of the relay closing line B to common.
    #[serde(default = "default_line_b_gpio")]
    pub line_b_gpio: u32,

    /// Whether a relay is energized by driving its pin high.
    #[serde(default)]
    pub active_high: bool,

    /// Pin backend.
    #[serde(default)]
    pub backend: RelayBackend,

    /// Root of the sysfs GPIO tree.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            line_a_gpio: default_line_a_gpio(),
            line_b_gpio: default_line_b_gpio(),
            active_high: false,
            backend: RelayBackend::default(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

/// Pulse timing configuration. All values are milliseconds unless noted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Relay on-time for the normal per-minute A and B pulses.
    #[serde(default = "default_minute_pulse_width_ms")]
    pub minute_pulse_width_ms: u64,

    /// Pause between the minute-59 pulses and the correction burst.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Number of A-only pulses in the hourly correction burst.
    #[serde(default = "default_correction_pulses")]
    pub correction_pulses: u32,

    /// Start-to-start spacing of correction pulses.
    #[serde(default = "default_correction_interval_ms")]
    pub correction_interval_ms: u64,

    /// Relay on-time of each correction pulse.
    #[serde(default = "default_correction_pulse_width_ms")]
    pub correction_pulse_width_ms: u64,

    /// Start-to-start spacing of fast-set A+B pulses.
    #[serde(default = "default_fast_set_interval_ms")]
    pub fast_set_interval_ms: u64,

    /// Relay on-time of each fast-set pulse.
    #[serde(default = "default_fast_set_pulse_width_ms")]
    pub fast_set_pulse_width_ms: u64,

    /// Hard cap on pulses per fast-set session.
    #[serde(default = "default_fast_set_max_pulses")]
    pub fast_set_max_pulses: u32,

    /// Hard cap on wall-clock seconds per fast-set session.
    #[serde(default = "default_fast_set_max_seconds")]
    pub fast_set_max_seconds: u64,

    /// Refresh the session status text every this many pulses.
    #[serde(default = "default_status_refresh_pulses")]
    pub status_refresh_pulses: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            minute_pulse_width_ms: default_minute_pulse_width_ms(),
            settle_ms: default_settle_ms(),
            correction_pulses: default_correction_pulses(),
            correction_interval_ms: default_correction_interval_ms(),
            correction_pulse_width_ms: default_correction_pulse_width_ms(),
            fast_set_interval_ms: default_fast_set_interval_ms(),
            fast_set_pulse_width_ms: default_fast_set_pulse_width_ms(),
            fast_set_max_pulses: default_fast_set_max_pulses(),
            fast_set_max_seconds: default_fast_set_max_seconds(),
            status_refresh_pulses: default_status_refresh_pulses(),
        }
    }
}

impl TimingConfig {
    /// Normal minute pulse width.
    pub const fn minute_pulse_width(&self) -> Duration {
        Duration::from_millis(self.minute_pulse_width_ms)
    }

    /// Settle pause before the correction burst.
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Correction burst spacing.
    pub const fn correction_interval(&self) -> Duration {
        Duration::from_millis(self.correction_interval_ms)
    }

    /// Correction pulse width.
    pub const fn correction_pulse_width(&self) -> Duration {
        Duration::from_millis(self.correction_pulse_width_ms)
    }

    /// Fast-set spacing.
    pub const fn fast_set_interval(&self) -> Duration {
        Duration::from_millis(self.fast_set_interval_ms)
    }

    /// Fast-set pulse width.
    pub const fn fast_set_pulse_width(&self) -> Duration {
        Duration::from_millis(self.fast_set_pulse_width_ms)
    }

    /// Fast-set wall-clock cap.
    pub const fn fast_set_max_duration(&self) -> Duration {
        Duration::from_secs(self.fast_set_max_seconds)
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateConfig {
    /// Path of the JSON state file. A leading `~/` is expanded to `$HOME`.
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl StateConfig {
    /// Resolve the state path, expanding a leading `~/`.
    pub fn resolved_path(&self) -> PathBuf {
        match (self.path.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
            _ => PathBuf::from(&self.path),
        }
    }
}

/// Control API listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
    /// Whether to start the HTTP control API at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind.
    #[serde(default = "default_api_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per line instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_line_a_gpio() -> u32 {
    26
}

const fn default_line_b_gpio() -> u32 {
    20
}

fn default_sysfs_root() -> String {
    String::from("/sys/class/gpio")
}

const fn default_minute_pulse_width_ms() -> u64 {
    1000
}

const fn default_settle_ms() -> u64 {
    200
}

const fn default_correction_pulses() -> u32 {
    17
}

const fn default_correction_interval_ms() -> u64 {
    2000
}

const fn default_correction_pulse_width_ms() -> u64 {
    500
}

const fn default_fast_set_interval_ms() -> u64 {
    2000
}

const fn default_fast_set_pulse_width_ms() -> u64 {
    600
}

const fn default_fast_set_max_pulses() -> u32 {
    400
}

const fn default_fast_set_max_seconds() -> u64 {
    2400
}

const fn default_status_refresh_pulses() -> u32 {
    10
}

fn default_state_path() -> String {
    String::from("~/master-clock/international_state.json")
}

fn default_api_host() -> String {
    String::from("0.0.0.0")
}

const fn default_api_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    String::from("info")
}

const fn default_true() -> bool {
    true
}
