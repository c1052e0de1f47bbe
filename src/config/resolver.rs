//! Resolution of start options into a validated [`TunnelDescriptor`].

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::Serialize;
use serde_json::Number;
use tracing::debug;

use super::error::{ConfigError, ConfigResult};
use super::options::{
    RawConfig, TunnelOptions, DISALLOWED_APPLICATIONS, DNS, IPV4_ADDR, MTU, ROUTES,
};
use super::settings::Settings;
use crate::cidr::{parse_cidr, Cidr};

pub const DEFAULT_IPV4_ADDR: &str = "10.126.126.1/24";
pub const DEFAULT_DNS: Ipv4Addr = Ipv4Addr::new(114, 114, 114, 114);
pub const DEFAULT_MTU: u32 = 1500;
pub const DEFAULT_SESSION_NAME: &str = "vpnservice";

/// Fully validated description of the tunnel to establish.
///
/// Only [`ConfigResolver`] builds these, so a descriptor in hand is always
/// complete and valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelDescriptor {
    session_name: String,
    blocking: bool,
    address: Cidr,
    mtu: u32,
    dns_server: IpAddr,
    routes: Vec<Cidr>,
    disallowed_applications: Vec<String>,
    metered: bool,
}

impl TunnelDescriptor {
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Always `false`: the tunnel descriptor is handed out in non-blocking mode.
    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn address(&self) -> Cidr {
        self.address
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn dns_server(&self) -> IpAddr {
        self.dns_server
    }

    /// Routes in the order they were given.
    pub fn routes(&self) -> &[Cidr] {
        &self.routes
    }

    pub fn disallowed_applications(&self) -> &[String] {
        &self.disallowed_applications
    }

    pub fn metered(&self) -> bool {
        self.metered
    }
}

/// Turns start options into descriptors.
///
/// Holds the descriptor fields that do not travel in the start bag.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    session_name: String,
    metered: bool,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        ConfigResolver {
            session_name: DEFAULT_SESSION_NAME.to_string(),
            metered: false,
        }
    }
}

impl ConfigResolver {
    pub fn new(session_name: impl Into<String>, metered: bool) -> ConfigResult<Self> {
        let session_name = session_name.into();
        if session_name.trim().is_empty() {
            return Err(ConfigError::EmptySessionName);
        }
        Ok(ConfigResolver {
            session_name,
            metered,
        })
    }

    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        Self::new(settings.session_name.clone(), settings.metered)
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Translate and validate an untyped bag.
    pub fn resolve(&self, raw: &RawConfig) -> ConfigResult<TunnelDescriptor> {
        let options = TunnelOptions::from_raw(raw)?;
        self.resolve_options(&options)
    }

    /// Validate typed options, filling in defaults for absent fields.
    ///
    /// The first invalid field aborts resolution.
    pub fn resolve_options(&self, options: &TunnelOptions) -> ConfigResult<TunnelDescriptor> {
        let address = parse_cidr_option(
            IPV4_ADDR,
            options.ipv4_addr.as_deref().unwrap_or(DEFAULT_IPV4_ADDR),
        )?;

        let mtu = match &options.mtu {
            None => DEFAULT_MTU,
            Some(mtu) => parse_mtu(mtu)?,
        };

        let dns_server = match options.dns.as_deref() {
            None => IpAddr::V4(DEFAULT_DNS),
            Some(dns) => IpAddr::from_str(dns).map_err(|_| ConfigError::InvalidAddress {
                key: DNS.to_string(),
                value: dns.to_string(),
            })?,
        };

        let mut routes: Vec<Cidr> = Vec::new();
        for route in options.routes.iter().flatten() {
            let route = parse_cidr_option(ROUTES, route)?;
            if routes.contains(&route) {
                debug!(route = %route, "Skipping duplicate route");
                continue;
            }
            routes.push(route);
        }

        let mut disallowed_applications: Vec<String> = Vec::new();
        for app in options.disallowed_applications.iter().flatten() {
            if app.is_empty() {
                return Err(ConfigError::Malformed {
                    key: DISALLOWED_APPLICATIONS.to_string(),
                    message: "empty application identifier".to_string(),
                });
            }
            if disallowed_applications.contains(app) {
                debug!(app = %app, "Skipping duplicate disallowed application");
                continue;
            }
            disallowed_applications.push(app.clone());
        }

        let descriptor = TunnelDescriptor {
            session_name: self.session_name.clone(),
            blocking: false,
            address,
            mtu,
            dns_server,
            routes,
            disallowed_applications,
            metered: self.metered,
        };
        debug!(?descriptor, "Resolved tunnel descriptor");
        Ok(descriptor)
    }
}

fn parse_cidr_option(key: &str, value: &str) -> ConfigResult<Cidr> {
    parse_cidr(value).map_err(|source| ConfigError::InvalidCidr {
        key: key.to_string(),
        source,
    })
}

fn parse_mtu(mtu: &Number) -> ConfigResult<u32> {
    let value = match (mtu.as_u64(), mtu.as_i64()) {
        (Some(value), _) => i128::from(value),
        (None, Some(value)) => i128::from(value),
        (None, None) => {
            return Err(ConfigError::Malformed {
                key: MTU.to_string(),
                message: format!("expected an integer, found {}", mtu),
            })
        }
    };
    u32::try_from(value)
        .ok()
        .filter(|mtu| *mtu > 0)
        .ok_or(ConfigError::InvalidMtu(value))
}

/// Resolve an untyped bag with the default resolver.
pub fn resolve(raw: &RawConfig) -> ConfigResult<TunnelDescriptor> {
    ConfigResolver::default().resolve(raw)
}
