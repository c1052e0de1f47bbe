//! Configuration for the tunnel service.
//!
//! Two inputs are handled here: the per-start options bag, resolved into a
//! [`TunnelDescriptor`], and the process-wide [`Settings`] file.

mod error;
pub mod options;
mod resolver;
mod settings;

pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
pub use options::{RawConfig, TunnelOptions};
pub use resolver::{
    resolve, ConfigResolver, TunnelDescriptor, DEFAULT_DNS, DEFAULT_IPV4_ADDR, DEFAULT_MTU,
    DEFAULT_SESSION_NAME,
};
pub use settings::{LinuxSettings, LoggingSettings, Settings};
