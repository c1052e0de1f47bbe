//! Owned tunnel descriptor.

use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

use thiserror::Error;

/// Closing the tunnel descriptor failed.
///
/// The descriptor is gone either way; the error is only worth logging.
#[derive(Debug, Error)]
#[error("failed to close tunnel descriptor {fd}: {source}")]
pub struct HandleReleaseError {
    pub fd: RawFd,
    #[source]
    pub source: io::Error,
}

/// Live tunnel interface descriptor.
///
/// Closing consumes the handle, so a handle can never be closed twice.
pub struct TunnelHandle {
    fd: OwnedFd,
}

impl TunnelHandle {
    pub fn new(fd: OwnedFd) -> Self {
        TunnelHandle { fd }
    }

    /// Numeric descriptor, as reported to the owning application.
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Close the descriptor, reporting the OS error if there is one.
    pub(crate) fn close(self) -> Result<(), HandleReleaseError> {
        let fd = self.fd.into_raw_fd();
        // SAFETY: `fd` was just released from an `OwnedFd`, nothing else owns it.
        let rc = unsafe { libc::close(fd) };
        if rc == 0 {
            Ok(())
        } else {
            Err(HandleReleaseError {
                fd,
                source: io::Error::last_os_error(),
            })
        }
    }
}

impl AsFd for TunnelHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for TunnelHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.raw_fd()
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("fd", &self.raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_close_releases_descriptor() {
        let (ours, mut peer) = UnixStream::pair().unwrap();
        let handle = TunnelHandle::new(OwnedFd::from(ours));
        assert!(handle.raw_fd() >= 0);

        handle.close().unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }
}
