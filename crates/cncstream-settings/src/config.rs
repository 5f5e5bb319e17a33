//! Configuration for cncstream
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats; the default file lives in the platform config
//! directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port selection, baud rate, timeouts)
//! - Job streaming (program path, pause polling, settle delay)
//! - Tool-length probing (approach and tool-change positions, feeds)
//! - Load position
//! - Logging (level, audit file)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the application config directory
pub const CONFIG_DIR_NAME: &str = "cncstream";

/// Name of the default config file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Which transport to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelection {
    /// First serial port that looks like a CNC controller
    Auto,
    /// No device; every line is acknowledged
    Dummy,
    /// Explicit device path
    Path(String),
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// `auto`, `dummy`, or a device path
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Upper bound for one transport read in milliseconds
    pub poll_interval_ms: u64,
    /// Wait limit for `ok`/`error` in milliseconds; 0 waits forever
    pub response_timeout_ms: u64,
    /// Delay after the wake-up sequence in milliseconds
    pub wake_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "auto".to_string(),
            baud_rate: 115200,
            poll_interval_ms: 50,
            response_timeout_ms: 0,
            wake_delay_ms: 2000,
        }
    }
}

impl ConnectionSettings {
    /// Interpret the `port` value
    pub fn port_selection(&self) -> PortSelection {
        let port = self.port.trim();
        if port.eq_ignore_ascii_case("auto") {
            PortSelection::Auto
        } else if port.eq_ignore_ascii_case("dummy") {
            PortSelection::Dummy
        } else {
            PortSelection::Path(port.to_string())
        }
    }

    /// Read poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Response timeout; `None` when waits are unbounded
    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_ms > 0).then(|| Duration::from_millis(self.response_timeout_ms))
    }

    /// Settle time after waking the controller
    pub fn wake_delay(&self) -> Duration {
        Duration::from_millis(self.wake_delay_ms)
    }
}

/// Job streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Program streamed by a bare `run`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_path: Option<PathBuf>,
    /// Poll period while paused, in milliseconds
    pub pause_poll_ms: u64,
    /// Delay after the completion trailer, in milliseconds
    pub settle_ms: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            program_path: None,
            pause_poll_ms: 100,
            settle_ms: 500,
        }
    }
}

impl JobSettings {
    /// Poll period while paused
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    /// Delay after the completion trailer
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Tool-length probe settings
///
/// Positions are machine coordinates in millimetres.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// X of the probe plate
    pub approach_x: f64,
    /// Y of the probe plate
    pub approach_y: f64,
    /// X where the operator changes the tool
    pub tool_change_x: f64,
    /// Y where the operator changes the tool
    pub tool_change_y: f64,
    /// Z where the operator changes the tool
    pub tool_change_z: f64,
    /// Relative probe travel; must be negative
    pub depth: f64,
    /// Feed for the first touch
    pub fast_feed: f64,
    /// Feed for the second, authoritative touch
    pub slow_feed: f64,
    /// Relative retract between touches
    pub backoff: f64,
    /// Wait limit for a probe report, in milliseconds
    pub report_timeout_ms: u64,
    /// Wait for the `ok` that trails a probe report, in milliseconds
    pub ack_window_ms: u64,
    /// Delay after applying the offset, in milliseconds
    pub settle_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            approach_x: -21.55,
            approach_y: -350.5,
            tool_change_x: 0.0,
            tool_change_y: 0.0,
            tool_change_z: 10.0,
            depth: -50.0,
            fast_feed: 200.0,
            slow_feed: 100.0,
            backoff: 10.0,
            report_timeout_ms: 90_000,
            ack_window_ms: 2_000,
            settle_ms: 1_000,
        }
    }
}

impl ProbeSettings {
    /// Wait limit for a probe report
    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    /// Wait for the trailing acknowledgement
    pub fn ack_window(&self) -> Duration {
        Duration::from_millis(self.ack_window_ms)
    }

    /// Delay after applying the offset
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Load position, machine coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for LoadPosition {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 10.0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append-only audit file; audit goes to the log when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            audit_log: None,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Job streaming settings
    pub job: JobSettings,
    /// Tool-length probe settings
    pub probe: ProbeSettings,
    /// Load position
    pub load_position: LoadPosition,
    /// Logging settings
    pub logging: LoggingSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("none").to_string()).into()),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        // Connection
        if self.connection.port.trim().is_empty() {
            return Err(SettingsError::invalid("connection.port", "must not be empty"));
        }
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if self.connection.poll_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.poll_interval_ms",
                "must be > 0",
            ));
        }

        // Job
        if self.job.pause_poll_ms == 0 {
            return Err(SettingsError::invalid("job.pause_poll_ms", "must be > 0"));
        }

        // Probe
        if self.probe.depth >= 0.0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "probe.depth".to_string(),
                value: self.probe.depth.to_string(),
            }
            .into());
        }
        if self.probe.fast_feed <= 0.0 || self.probe.slow_feed <= 0.0 {
            return Err(SettingsError::invalid("probe", "feed rates must be > 0"));
        }
        if self.probe.backoff <= 0.0 {
            return Err(SettingsError::invalid("probe.backoff", "must be > 0"));
        }
        if self.probe.report_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "probe.report_timeout_ms",
                "must be > 0",
            ));
        }

        // Logging
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS
            .iter()
            .any(|level| level.eq_ignore_ascii_case(self.logging.level.trim()))
        {
            return Err(SettingsError::invalid(
                "logging.level",
                format!("'{}' is not one of {}", self.logging.level, LEVELS.join(", ")),
            ));
        }

        Ok(())
    }

    /// Platform default config path (`<config dir>/cncstream/config.toml`)
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                ConfigError::UnsupportedPlatform("no user config directory".to_string()).into()
            })
    }

    /// Load `path`, or the default path when `None`
    ///
    /// A missing file yields defaults; a present but invalid file is an
    /// error.
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("{}; using default settings", e);
                    return Ok(Self::default());
                }
            },
        };

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::info!("No config at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }
}
