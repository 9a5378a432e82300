//! Kernel error types

use core_types::VirtualPort;
use std::fmt;
use thiserror::Error;

/// Errors that can occur when interacting with the kernel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// Malformed port, address, descriptor or buffer
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Nothing is listening on the dialed port
    #[error("Connection refused: nothing listening on {0}")]
    Unavailable(VirtualPort),

    /// Another listener already owns the port
    #[error("Address already in use: {0}")]
    AlreadyBound(VirtualPort),

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// The descriptor or operation is not supported
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The resource has been torn down
    #[error("Use of closed resource")]
    Closed,

    /// The wait was abandoned before it completed
    #[error("Operation canceled")]
    Canceled,

    /// Named entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Access mode does not allow the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Program resolution or launch failed
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    /// The tunnel delivered something that does not fit the request
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result alias used across the kernel crates
pub type KernelResult<T> = Result<T, KernelError>;

/// POSIX-style error numbers surfaced at the syscall-emulation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[allow(clippy::upper_case_acronyms)]
pub enum Errno {
    ENOENT = 2,
    EAGAIN = 11,
    EACCES = 13,
    EINVAL = 22,
    EPIPE = 32,
    ENOSYS = 38,
    EPROTO = 71,
    EADDRINUSE = 98,
    ETIMEDOUT = 110,
    ECONNREFUSED = 111,
    ECANCELED = 125,
}

impl Errno {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

impl KernelError {
    /// Maps the error onto the errno a guest would observe
    pub fn errno(&self) -> Errno {
        match self {
            KernelError::InvalidArgument(_) => Errno::EINVAL,
            KernelError::Unavailable(_) => Errno::ECONNREFUSED,
            KernelError::AlreadyBound(_) => Errno::EADDRINUSE,
            KernelError::Timeout => Errno::ETIMEDOUT,
            KernelError::NotImplemented(_) => Errno::ENOSYS,
            KernelError::Closed => Errno::EPIPE,
            KernelError::Canceled => Errno::ECANCELED,
            KernelError::NotFound(_) => Errno::ENOENT,
            KernelError::PermissionDenied(_) => Errno::EACCES,
            KernelError::SpawnFailed(_) => Errno::EAGAIN,
            KernelError::Protocol(_) => Errno::EPROTO,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        KernelError::InvalidArgument(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        KernelError::NotImplemented(message.into())
    }
}
