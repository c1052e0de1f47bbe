//! Process-wide entry points.
//!
//! Start arrives through the application while revoke and destroy arrive
//! out-of-band from the host, so the controller is installed once in a
//! process-wide slot where every trigger can find it. The live session inside
//! it is set on entering `Active` and cleared on entering `Idle` under the
//! controller's own lock; a trigger that arrives after teardown finds no
//! session and does nothing.

use std::os::fd::RawFd;
use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::{LifecycleController, StopOutcome, StopReason};
use crate::config::RawConfig;
use crate::error::{ServiceError, ServiceResult};

static SERVICE: OnceLock<Arc<LifecycleController>> = OnceLock::new();

/// Install the process's controller.
///
/// Only the first call wins; later calls get their controller back.
pub fn install(controller: Arc<LifecycleController>) -> Result<(), Arc<LifecycleController>> {
    SERVICE.set(controller)
}

/// The installed controller, active or not.
pub fn installed() -> Option<Arc<LifecycleController>> {
    SERVICE.get().cloned()
}

/// The installed controller, only while it holds a live tunnel.
pub fn current() -> Option<Arc<LifecycleController>> {
    SERVICE.get().filter(|c| c.is_active()).cloned()
}

pub fn on_start(raw: &RawConfig) -> ServiceResult<RawFd> {
    SERVICE
        .get()
        .ok_or(ServiceError::NotInstalled)?
        .start(raw)
}

pub fn request_stop() -> ServiceResult<StopOutcome> {
    stop(StopReason::Requested)
}

pub fn on_revoke() -> ServiceResult<StopOutcome> {
    stop(StopReason::Revoked)
}

pub fn on_destroy() -> ServiceResult<StopOutcome> {
    stop(StopReason::Destroyed)
}

fn stop(reason: StopReason) -> ServiceResult<StopOutcome> {
    match SERVICE.get() {
        Some(controller) => controller.stop(reason),
        None => {
            debug!(%reason, "Stop ignored, no service installed");
            Ok(StopOutcome::AlreadyIdle)
        }
    }
}
