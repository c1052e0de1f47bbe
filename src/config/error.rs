//! Error types for configuration handling.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cidr::CidrError;

/// Result type for resolving start options.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while turning start options into a tunnel descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A CIDR-valued option failed to parse
    #[error("invalid value for {key}: {source}")]
    InvalidCidr {
        key: String,
        #[source]
        source: CidrError,
    },

    /// An address-valued option is not an IP literal
    #[error("invalid address for {key}: {value:?}")]
    InvalidAddress { key: String, value: String },

    /// MTU must be an integer in `1..=u32::MAX`
    #[error("invalid MTU: {0}")]
    InvalidMtu(i128),

    /// A value has the wrong type or shape
    #[error("malformed value for {key}: {message}")]
    Malformed { key: String, message: String },

    /// The session name must not be empty
    #[error("session name must not be empty")]
    EmptySessionName,
}

/// Result type for loading service settings.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Errors raised while loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Error reading the settings file
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Error parsing TOML
    #[error("failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),

    /// A setting has an unusable value
    #[error("invalid setting {key}: {message}")]
    InvalidValue { key: String, message: String },
}
