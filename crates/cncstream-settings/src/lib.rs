//! cncstream Settings Crate
//!
//! Handles application configuration: file formats, defaults and
//! validation.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, JobSettings, LoadPosition, LoggingSettings, PortSelection,
    ProbeSettings, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
};
pub use error::{ConfigError, SettingsError, SettingsResult};
