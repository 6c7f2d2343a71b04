//! Error taxonomy shared by the Rust API and the C ABI.

use libc::c_int;
use thiserror::Error;

/// Every failure the bridge can report.
///
/// Construction failures (`AllocationFailed`, `SessionCreateFailed`,
/// `MountFailed`) leave nothing behind and mean `create` has to be retried
/// from scratch. `NoDataAvailable` and `ReceiveFailed` come from `pump` and
/// are recoverable: the mount stays live and the host simply polls again.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The argument vector or session state could not be allocated.
    #[error("failed to allocate session state")]
    AllocationFailed,
    /// `fuse_session_new` returned no session.
    #[error("failed to create fuse session")]
    SessionCreateFailed,
    /// The session existed but could not be mounted.
    #[error("failed to mount filesystem")]
    MountFailed,
    /// Nothing was pending on the session descriptor.
    #[error("no request pending")]
    NoDataAvailable,
    /// The receive primitive failed with the contained errno.
    #[error("failed to receive request (errno {0})")]
    ReceiveFailed(i32),
    /// The session reports no usable descriptor.
    #[error("session descriptor unavailable")]
    DescriptorUnavailable,
    /// A null session handle was passed in.
    #[error("no session")]
    NoSession,
}

impl ErrorKind {
    /// Stable integer code used across the C ABI. Zero is reserved for success.
    pub fn code(&self) -> c_int {
        match self {
            ErrorKind::AllocationFailed => 1,
            ErrorKind::SessionCreateFailed => 2,
            ErrorKind::MountFailed => 3,
            ErrorKind::NoDataAvailable => 4,
            ErrorKind::ReceiveFailed(_) => 5,
            ErrorKind::DescriptorUnavailable => 6,
            ErrorKind::NoSession => 7,
        }
    }
}

/// Result alias for bridge operations.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Folds a bridge result into the C convention of 0 or an error code.
pub(crate) fn to_code(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}
