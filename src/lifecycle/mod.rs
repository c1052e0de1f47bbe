//! Tunnel lifecycle state machine.
//!
//! ```text
//! Idle --start--> Starting --ok--> Active --stop--> Stopping --> Idle
//!                    |
//!                    +--error--> Idle
//! ```
//!
//! The controller is the only owner of the tunnel handle. State and handle
//! live behind one mutex, and every trigger holds it for the whole
//! transition: a second start waits and then sees `Active`, a stop arriving
//! during a start waits until the start has finished.
//!
//! Events are queued inside the transition and delivered once the state lock
//! is released, strictly in transition order. A sink may therefore call back
//! into the controller, e.g. stop the tunnel in response to
//! `vpn_service_start`; events raised by such a call are delivered after the
//! one being handled.

pub mod global;

use std::collections::VecDeque;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ConfigResolver, RawConfig, TunnelDescriptor, TunnelOptions};
use crate::error::{ServiceError, ServiceResult};
use crate::event::{EventSink, ServiceEvent};
use crate::tunnel::{Establisher, TunProvider, TunnelHandle};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No tunnel
    Idle,
    /// Resolving options and establishing
    Starting,
    /// Holding a live tunnel handle
    Active,
    /// Releasing the handle
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Active => "active",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Which termination trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Explicit stop request from the owning application
    Requested,
    /// The host withdrew the tunnel permission
    Revoked,
    /// The hosting process or service is being torn down
    Destroyed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::Requested => "requested",
            StopReason::Revoked => "revoked",
            StopReason::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Result of a stop-class trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This call released the tunnel
    Released { reason: StopReason, session_id: Uuid },
    /// Nothing to stop
    AlreadyIdle,
}

struct ActiveSession {
    id: Uuid,
    handle: TunnelHandle,
    descriptor: TunnelDescriptor,
}

struct Inner {
    state: LifecycleState,
    session: Option<ActiveSession>,
}

/// Events raised by transitions but not yet handed to the sink.
#[derive(Default)]
struct Outbox {
    pending: VecDeque<ServiceEvent>,
    /// A thread is currently draining `pending`
    dispatching: bool,
}

/// Clears `dispatching` if a sink panics mid-delivery.
struct DispatchUnwind<'a>(&'a Mutex<Outbox>);

impl Drop for DispatchUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut outbox = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            outbox.dispatching = false;
        }
    }
}

/// Owns the tunnel for its whole lifetime.
pub struct LifecycleController {
    resolver: ConfigResolver,
    establisher: Establisher,
    sink: Arc<dyn EventSink>,
    inner: Mutex<Inner>,
    outbox: Mutex<Outbox>,
}

impl LifecycleController {
    pub fn new(
        resolver: ConfigResolver,
        provider: Arc<dyn TunProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        LifecycleController {
            resolver,
            establisher: Establisher::new(provider),
            sink,
            inner: Mutex::new(Inner {
                state: LifecycleState::Idle,
                session: None,
            }),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    /// Resolve `raw`, establish the tunnel and become `Active`.
    ///
    /// Returns the tunnel's numeric descriptor, which is also reported in the
    /// `vpn_service_start` event.
    pub fn start(&self, raw: &RawConfig) -> ServiceResult<RawFd> {
        self.start_inner(|resolver| resolver.resolve(raw))
    }

    /// Like [`start`](Self::start) for options that are already typed.
    pub fn start_with(&self, options: &TunnelOptions) -> ServiceResult<RawFd> {
        self.start_inner(|resolver| resolver.resolve_options(options))
    }

    fn start_inner<F>(&self, resolve: F) -> ServiceResult<RawFd>
    where
        F: FnOnce(&ConfigResolver) -> Result<TunnelDescriptor, ConfigError>,
    {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Idle {
            warn!(state = %inner.state, "Start rejected, tunnel already active");
            return Err(ServiceError::AlreadyActive);
        }
        inner.state = LifecycleState::Starting;
        debug!("Tunnel starting");

        let descriptor = match resolve(&self.resolver) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                inner.state = LifecycleState::Idle;
                warn!(error = %e, "Rejected tunnel options");
                return Err(e.into());
            }
        };

        let handle = match self.establisher.establish(&descriptor) {
            Ok(handle) => handle,
            Err(e) => {
                inner.state = LifecycleState::Idle;
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let fd = handle.raw_fd();
        inner.session = Some(ActiveSession {
            id,
            handle,
            descriptor,
        });
        inner.state = LifecycleState::Active;
        info!(session_id = %id, fd, "Tunnel active");
        self.enqueue(ServiceEvent::Started { fd });

        drop(inner);
        self.dispatch();
        Ok(fd)
    }

    /// Release the tunnel if there is one.
    ///
    /// Idempotent: on an idle controller this returns
    /// [`StopOutcome::AlreadyIdle`] and emits nothing. `vpn_service_stop` is
    /// queued before the descriptor is closed. If closing fails the
    /// controller still ends up idle and the close error is returned.
    pub fn stop(&self, reason: StopReason) -> ServiceResult<StopOutcome> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Active {
            debug!(state = %inner.state, %reason, "Stop ignored, no active tunnel");
            return Ok(StopOutcome::AlreadyIdle);
        }
        inner.state = LifecycleState::Stopping;

        let session = inner.session.take();
        self.enqueue(ServiceEvent::Stopped);

        let Some(session) = session else {
            inner.state = LifecycleState::Idle;
            drop(inner);
            self.dispatch();
            error!(%reason, "Active state without a tunnel handle");
            return Ok(StopOutcome::AlreadyIdle);
        };

        let fd = session.handle.raw_fd();
        let released = session.handle.close();
        inner.state = LifecycleState::Idle;

        drop(inner);
        self.dispatch();

        match released {
            Ok(()) => {
                info!(session_id = %session.id, fd, %reason, "Tunnel released");
                Ok(StopOutcome::Released {
                    reason,
                    session_id: session.id,
                })
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, %reason, "Tunnel released with close error");
                Err(e.into())
            }
        }
    }

    /// Explicit stop request.
    pub fn request_stop(&self) -> ServiceResult<StopOutcome> {
        self.stop(StopReason::Requested)
    }

    /// The host revoked the tunnel.
    pub fn on_revoke(&self) -> ServiceResult<StopOutcome> {
        self.stop(StopReason::Revoked)
    }

    /// The hosting process is going away.
    pub fn on_destroy(&self) -> ServiceResult<StopOutcome> {
        self.stop(StopReason::Destroyed)
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Descriptor number of the live tunnel.
    pub fn current_fd(&self) -> Option<RawFd> {
        self.lock().session.as_ref().map(|s| s.handle.raw_fd())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().session.as_ref().map(|s| s.id)
    }

    /// Descriptor the live tunnel was established from.
    pub fn descriptor(&self) -> Option<TunnelDescriptor> {
        self.lock().session.as_ref().map(|s| s.descriptor.clone())
    }

    fn enqueue(&self, event: ServiceEvent) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .push_back(event);
    }

    /// Deliver queued events unless another call is already doing so.
    ///
    /// Must be called without the state lock held.
    fn dispatch(&self) {
        {
            let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
            if outbox.dispatching {
                return;
            }
            outbox.dispatching = true;
        }

        let _unwind = DispatchUnwind(&self.outbox);
        loop {
            let event = {
                let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
                match outbox.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.dispatching = false;
                        return;
                    }
                }
            };
            event.emit_to(self.sink.as_ref());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            let mut inner = poisoned.into_inner();
            // Only a panic inside a transition leaves these states behind.
            match inner.state {
                LifecycleState::Starting => {
                    warn!("Recovering from interrupted start");
                    inner.state = LifecycleState::Idle;
                }
                LifecycleState::Stopping => {
                    warn!("Recovering from interrupted stop");
                    inner.session = None;
                    inner.state = LifecycleState::Idle;
                }
                LifecycleState::Idle | LifecycleState::Active => {}
            }
            self.inner.clear_poison();
            inner
        })
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("LifecycleController");
        d.field("session_name", &self.resolver.session_name());
        if let Ok(inner) = self.inner.try_lock() {
            d.field("state", &inner.state);
        }
        d.finish_non_exhaustive()
    }
}
