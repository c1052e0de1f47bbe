//! Tunnel establishment.
//!
//! The host capability is abstracted by [`TunProvider`]; [`Establisher`]
//! drives it from a validated descriptor and yields a [`TunnelHandle`].

mod establisher;
mod handle;
#[cfg(target_os = "linux")]
pub mod linux;
mod provider;

pub use establisher::{EstablishError, EstablishResult, EstablishStep, Establisher};
pub use handle::{HandleReleaseError, TunnelHandle};
pub use provider::{CapabilityError, CapabilityResult, Feature, TunProvider, TunnelBuilder};
