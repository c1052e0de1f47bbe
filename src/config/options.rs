//! Typed per-start tunnel options.
//!
//! Callers hand the service an untyped key/value bag. [`TunnelOptions::from_raw`]
//! is the one place where that bag is turned into typed fields; validation of
//! the values themselves happens later in the resolver.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::debug;

use super::error::{ConfigError, ConfigResult};

/// Untyped configuration bag as delivered by the host.
pub type RawConfig = serde_json::Map<String, Value>;

pub const IPV4_ADDR: &str = "IPV4_ADDR";
pub const ROUTES: &str = "ROUTES";
pub const DNS: &str = "DNS";
pub const DISALLOWED_APPLICATIONS: &str = "DISALLOWED_APPLICATIONS";
pub const MTU: &str = "MTU";

const KNOWN_KEYS: [&str; 5] = [IPV4_ADDR, ROUTES, DNS, DISALLOWED_APPLICATIONS, MTU];

/// Options recognised in the start bag. Absent fields take resolver defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// Interface address in CIDR form
    #[serde(rename = "IPV4_ADDR", default, skip_serializing_if = "Option::is_none")]
    pub ipv4_addr: Option<String>,

    /// Routes in CIDR form, in priority order
    #[serde(rename = "ROUTES", default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<String>>,

    /// DNS server address
    #[serde(rename = "DNS", default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,

    /// Application identifiers excluded from the tunnel
    #[serde(
        rename = "DISALLOWED_APPLICATIONS",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub disallowed_applications: Option<Vec<String>>,

    /// Interface MTU. Kept as a JSON number so out-of-range integers of
    /// either sign reach validation.
    #[serde(rename = "MTU", default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<Number>,
}

impl TunnelOptions {
    pub fn new() -> Self {
        TunnelOptions::default()
    }

    /// Translate an untyped bag into typed options.
    ///
    /// Fails with [`ConfigError::Malformed`] when a known key holds a value of
    /// the wrong type. `null` is treated as absent and unknown keys are ignored.
    pub fn from_raw(raw: &RawConfig) -> ConfigResult<Self> {
        for key in raw.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "Ignoring unknown tunnel option");
            }
        }

        Ok(TunnelOptions {
            ipv4_addr: field(raw, IPV4_ADDR)?,
            routes: field(raw, ROUTES)?,
            dns: field(raw, DNS)?,
            disallowed_applications: field(raw, DISALLOWED_APPLICATIONS)?,
            mtu: integer_field(raw, MTU)?,
        })
    }

    /// Translate a JSON value, which must be an object.
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        match value {
            Value::Object(raw) => Self::from_raw(raw),
            Value::Null => Ok(Self::default()),
            other => Err(ConfigError::Malformed {
                key: "<root>".to_string(),
                message: format!("expected an object, found {}", type_name(other)),
            }),
        }
    }

    /// Render back into the untyped representation.
    pub fn to_raw(&self) -> RawConfig {
        match serde_json::to_value(self) {
            Ok(Value::Object(raw)) => raw,
            _ => RawConfig::new(),
        }
    }

    pub fn with_ipv4_addr(mut self, cidr: impl Into<String>) -> Self {
        self.ipv4_addr = Some(cidr.into());
        self
    }

    pub fn with_route(mut self, cidr: impl Into<String>) -> Self {
        self.routes.get_or_insert_with(Vec::new).push(cidr.into());
        self
    }

    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        self.dns = Some(dns.into());
        self
    }

    pub fn with_disallowed_application(mut self, app: impl Into<String>) -> Self {
        self.disallowed_applications
            .get_or_insert_with(Vec::new)
            .push(app.into());
        self
    }

    pub fn with_mtu(mut self, mtu: impl Into<Number>) -> Self {
        self.mtu = Some(mtu.into());
        self
    }
}

fn field<T: DeserializeOwned>(raw: &RawConfig, key: &str) -> ConfigResult<Option<T>> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::Malformed {
                key: key.to_string(),
                message: format!("{} (found {})", e, type_name(value)),
            }),
    }
}

fn integer_field(raw: &RawConfig, key: &str) -> ConfigResult<Option<Number>> {
    match field::<Number>(raw, key)? {
        Some(number) if number.is_f64() => Err(ConfigError::Malformed {
            key: key.to_string(),
            message: format!("expected an integer, found {}", number),
        }),
        number => Ok(number),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
