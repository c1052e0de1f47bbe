//! The host's tunnel-creation capability.
//!
//! A [`TunProvider`] hands out [`TunnelBuilder`]s. The establisher feeds a
//! builder one setting at a time and then commits it; until the commit the
//! builder owns any partially applied state and must discard it when dropped.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::os::fd::OwnedFd;

use thiserror::Error;

/// Result type for capability calls.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors reported by a capability implementation.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The host refused the setting or the commit
    #[error("rejected by host: {0}")]
    Rejected(String),

    /// The host cannot express the setting at all
    #[error("unsupported on this host: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Optional features a host may or may not offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Marking the tunnel as a metered connection
    MeteredHint,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::MeteredHint => write!(f, "metered hint"),
        }
    }
}

/// Step-by-step configuration of one tunnel interface.
pub trait TunnelBuilder: Send {
    fn set_session(&mut self, name: &str) -> CapabilityResult<()>;

    fn set_blocking(&mut self, blocking: bool) -> CapabilityResult<()>;

    fn add_address(&mut self, address: IpAddr, prefix_len: u8) -> CapabilityResult<()>;

    fn set_mtu(&mut self, mtu: u32) -> CapabilityResult<()>;

    fn add_dns_server(&mut self, server: IpAddr) -> CapabilityResult<()>;

    fn add_route(&mut self, address: IpAddr, prefix_len: u8) -> CapabilityResult<()>;

    fn add_disallowed_application(&mut self, application: &str) -> CapabilityResult<()>;

    /// Only called when the provider reports [`Feature::MeteredHint`].
    fn set_metered(&mut self, metered: bool) -> CapabilityResult<()>;

    /// Create the interface and hand over its descriptor.
    fn establish(self: Box<Self>) -> CapabilityResult<OwnedFd>;
}

/// Source of tunnel builders for the current host.
pub trait TunProvider: Send + Sync {
    fn new_builder(&self) -> CapabilityResult<Box<dyn TunnelBuilder>>;

    /// Runtime query for optional features.
    fn supports(&self, feature: Feature) -> bool;
}
