//! Tunnel interface lifecycle for a host VPN service.
//!
//! Start options are resolved into a validated [`TunnelDescriptor`], the
//! host's tunnel capability turns that into a live descriptor, and the
//! [`LifecycleController`] owns it until an explicit stop, a revocation or
//! process teardown releases it, exactly once.

pub mod cidr;
pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod tunnel;

pub use cidr::{parse_cidr, Cidr, CidrError};
pub use config::{ConfigError, ConfigResolver, RawConfig, Settings, TunnelDescriptor, TunnelOptions};
pub use error::{ServiceError, ServiceResult};
pub use event::{EventSink, ServiceEvent, VPN_SERVICE_START, VPN_SERVICE_STOP};
pub use lifecycle::{LifecycleController, LifecycleState, StopOutcome, StopReason};
pub use tunnel::{EstablishError, EstablishStep, Establisher, TunProvider, TunnelHandle};
