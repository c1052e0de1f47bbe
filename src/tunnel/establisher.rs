//! Drives a [`TunProvider`] from a [`TunnelDescriptor`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use super::handle::TunnelHandle;
use super::provider::{CapabilityError, Feature, TunProvider, TunnelBuilder};
use crate::cidr::Cidr;
use crate::config::TunnelDescriptor;

/// Result type for establishment.
pub type EstablishResult<T> = Result<T, EstablishError>;

/// The configuration step a capability call belonged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstablishStep {
    NewBuilder,
    Session,
    Blocking,
    Address(Cidr),
    Mtu(u32),
    DnsServer(std::net::IpAddr),
    Route(Cidr),
    DisallowedApplication(String),
    Metered,
    Commit,
}

impl fmt::Display for EstablishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstablishStep::NewBuilder => write!(f, "create builder"),
            EstablishStep::Session => write!(f, "set session"),
            EstablishStep::Blocking => write!(f, "set blocking mode"),
            EstablishStep::Address(cidr) => write!(f, "add address {}", cidr),
            EstablishStep::Mtu(mtu) => write!(f, "set MTU {}", mtu),
            EstablishStep::DnsServer(dns) => write!(f, "add DNS server {}", dns),
            EstablishStep::Route(cidr) => write!(f, "add route {}", cidr),
            EstablishStep::DisallowedApplication(app) => {
                write!(f, "add disallowed application {}", app)
            }
            EstablishStep::Metered => write!(f, "set metered hint"),
            EstablishStep::Commit => write!(f, "establish"),
        }
    }
}

/// Establishment failed at `step`; no tunnel exists.
#[derive(Debug, Error)]
#[error("failed to {step}: {source}")]
pub struct EstablishError {
    pub step: EstablishStep,
    #[source]
    pub source: CapabilityError,
}

trait StepContext<T> {
    fn at(self, step: EstablishStep) -> EstablishResult<T>;
}

impl<T> StepContext<T> for Result<T, CapabilityError> {
    fn at(self, step: EstablishStep) -> EstablishResult<T> {
        self.map_err(|source| EstablishError { step, source })
    }
}

/// Creates tunnels through the host capability.
#[derive(Clone)]
pub struct Establisher {
    provider: Arc<dyn TunProvider>,
}

impl Establisher {
    pub fn new(provider: Arc<dyn TunProvider>) -> Self {
        Establisher { provider }
    }

    /// Configure and commit a tunnel for `descriptor`.
    ///
    /// On failure the builder is dropped and the capability discards whatever
    /// was applied so far.
    pub fn establish(&self, descriptor: &TunnelDescriptor) -> EstablishResult<TunnelHandle> {
        let builder = self.provider.new_builder().at(EstablishStep::NewBuilder)?;
        match self.configure(builder, descriptor) {
            Ok(handle) => {
                info!(
                    fd = handle.raw_fd(),
                    session = descriptor.session_name(),
                    address = %descriptor.address(),
                    "Tunnel established"
                );
                Ok(handle)
            }
            Err(e) => {
                error!(step = %e.step, error = %e.source, "Tunnel establishment failed");
                Err(e)
            }
        }
    }

    fn configure(
        &self,
        mut builder: Box<dyn TunnelBuilder>,
        descriptor: &TunnelDescriptor,
    ) -> EstablishResult<TunnelHandle> {
        builder
            .set_session(descriptor.session_name())
            .at(EstablishStep::Session)?;
        builder
            .set_blocking(descriptor.blocking())
            .at(EstablishStep::Blocking)?;

        let address = descriptor.address();
        builder
            .add_address(address.address(), address.prefix_len())
            .at(EstablishStep::Address(address))?;

        builder
            .set_mtu(descriptor.mtu())
            .at(EstablishStep::Mtu(descriptor.mtu()))?;
        builder
            .add_dns_server(descriptor.dns_server())
            .at(EstablishStep::DnsServer(descriptor.dns_server()))?;

        for route in descriptor.routes() {
            debug!(route = %route, "Adding route");
            builder
                .add_route(route.address(), route.prefix_len())
                .at(EstablishStep::Route(*route))?;
        }

        for app in descriptor.disallowed_applications() {
            debug!(app = %app, "Excluding application");
            builder
                .add_disallowed_application(app)
                .at(EstablishStep::DisallowedApplication(app.clone()))?;
        }

        if self.provider.supports(Feature::MeteredHint) {
            builder
                .set_metered(descriptor.metered())
                .at(EstablishStep::Metered)?;
        } else {
            debug!("Host has no metered hint, skipping");
        }

        let fd = builder.establish().at(EstablishStep::Commit)?;
        Ok(TunnelHandle::new(fd))
    }
}

impl fmt::Debug for Establisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Establisher").finish_non_exhaustive()
    }
}
