//! Address/prefix parsing for interface addresses and routes.
//!
//! Inputs use the `address/prefix` notation (e.g. `10.0.0.0/8`). Only address
//! literals are accepted; host names are never resolved, so parsing is a pure
//! function of the input string.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for CIDR parsing.
pub type CidrResult<T> = Result<T, CidrError>;

/// Errors produced by [`parse_cidr`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    /// The input does not split into exactly two parts on `/`
    #[error("invalid CIDR format: {0:?}")]
    InvalidFormat(String),

    /// The address part is not a valid IP address literal
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// The prefix part is not an integer in range for the address family
    #[error("invalid prefix length: {0:?}")]
    InvalidPrefixLength(String),
}

/// An address together with its prefix length.
///
/// The address is kept exactly as written; host bits are not masked off.
/// Serialized in its `address/prefix` string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    address: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    /// Build a prefix, checking the length against the address family.
    pub fn new(address: IpAddr, prefix_len: u8) -> CidrResult<Self> {
        if prefix_len > max_prefix_len(&address) {
            return Err(CidrError::InvalidPrefixLength(prefix_len.to_string()));
        }
        Ok(Cidr {
            address,
            prefix_len,
        })
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> CidrResult<Self> {
        parse_cidr(s)
    }
}

impl TryFrom<String> for Cidr {
    type Error = CidrError;

    fn try_from(s: String) -> CidrResult<Self> {
        parse_cidr(&s)
    }
}

impl From<Cidr> for String {
    fn from(cidr: Cidr) -> String {
        cidr.to_string()
    }
}

fn max_prefix_len(address: &IpAddr) -> u8 {
    match address {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Parse an `address/prefix` string.
pub fn parse_cidr(input: &str) -> CidrResult<Cidr> {
    let parts: Vec<&str> = input.split('/').collect();
    if parts.len() != 2 {
        return Err(CidrError::InvalidFormat(input.to_string()));
    }

    let address = IpAddr::from_str(parts[0])
        .map_err(|_| CidrError::InvalidAddress(parts[0].to_string()))?;

    // `u8::from_str` would also take a leading '+'
    let prefix = parts[1];
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CidrError::InvalidPrefixLength(prefix.to_string()));
    }
    let prefix_len = prefix
        .parse::<u8>()
        .map_err(|_| CidrError::InvalidPrefixLength(prefix.to_string()))?;

    if prefix_len > max_prefix_len(&address) {
        return Err(CidrError::InvalidPrefixLength(prefix.to_string()));
    }

    Ok(Cidr {
        address,
        prefix_len,
    })
}
