//! Service settings loaded from a TOML file.
//!
//! These settings are fixed for the lifetime of the process, unlike the
//! per-start options bag.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{SettingsError, SettingsResult};
use super::resolver::DEFAULT_SESSION_NAME;

/// Linux interface names are limited to IFNAMSIZ - 1 bytes.
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Session name reported to the tunnel capability (default: "vpnservice")
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Metered hint applied where the platform supports it (default: false)
    #[serde(default)]
    pub metered: bool,

    /// Linux-specific settings
    #[serde(default)]
    pub linux: LinuxSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            session_name: default_session_name(),
            metered: false,
            linux: LinuxSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Settings for the Linux TUN capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinuxSettings {
    /// Name for the TUN interface; the kernel picks one when unset
    pub interface_name: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,

    /// Also write to a daily rolling file
    #[serde(default)]
    pub log_to_file: bool,

    /// Directory for log files (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Base file name for log files (default: "vpnservice")
    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file_name() -> String {
    "vpnservice".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
            json: false,
            log_to_file: false,
            log_dir: default_log_dir(),
            log_file_name: default_log_file_name(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file and validate them.
    pub fn load(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&content)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> SettingsResult<Self> {
        match Self::load(path.as_ref()) {
            Err(SettingsError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                warn!(
                    path = %path.as_ref().display(),
                    "Settings file not found, using defaults"
                );
                Ok(Settings::default())
            }
            other => other,
        }
    }

    /// Parse settings from a TOML string and validate them.
    pub fn from_toml(content: &str) -> SettingsResult<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> SettingsResult<()> {
        if self.session_name.trim().is_empty() {
            return Err(SettingsError::InvalidValue {
                key: "session_name".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if let Some(name) = &self.linux.interface_name {
            let valid_chars = name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.');
            if name.is_empty() || name.len() > MAX_INTERFACE_NAME_LEN || !valid_chars {
                return Err(SettingsError::InvalidValue {
                    key: "linux.interface_name".to_string(),
                    message: format!(
                        "{:?} is not a valid interface name (1-{} characters of [A-Za-z0-9._-])",
                        name, MAX_INTERFACE_NAME_LEN
                    ),
                });
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(SettingsError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!("unknown level {:?}", other),
            }),
        }
    }
}
