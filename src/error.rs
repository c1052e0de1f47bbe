//! Errors surfaced by the lifecycle controller.

use thiserror::Error;

use crate::config::ConfigError;
use crate::tunnel::{EstablishError, HandleReleaseError};

/// Result type for controller operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error returned to the caller of a lifecycle trigger.
///
/// None of these are fatal to the process: after any of them the controller
/// is either idle or still holding its previous tunnel.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The start options were rejected; state is unchanged
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The host failed to create the tunnel; state is back to idle
    #[error("establish error: {0}")]
    Establish(#[from] EstablishError),

    /// A tunnel is already starting or running
    #[error("a tunnel session is already active")]
    AlreadyActive,

    /// The tunnel was released but closing its descriptor failed
    #[error("handle release error: {0}")]
    HandleRelease(#[from] HandleReleaseError),

    /// No controller has been installed for this process
    #[error("no tunnel service installed")]
    NotInstalled,
}
