//! Identifiers for kernel resources and virtual addresses

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a kernel-managed resource
///
/// Handles 0, 1 and 2 are reserved for console I/O. Everything else is issued
/// by a [`crate::HandleAllocator`] starting at [`Handle::FIRST_DYNAMIC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Standard input
    pub const STDIN: Handle = Handle(0);
    /// Standard output, routed to the console sink
    pub const STDOUT: Handle = Handle(1);
    /// Standard error, routed to the console sink
    pub const STDERR: Handle = Handle(2);
    /// First handle handed out to dynamic resources
    pub const FIRST_DYNAMIC: u64 = 10_000;

    /// Creates a handle from its raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Checks whether this is one of the reserved console handles
    pub const fn is_reserved(&self) -> bool {
        self.0 <= 2
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Bindable address for listen/dial
///
/// Port 0 asks the kernel to pick a free ephemeral port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualPort(u16);

impl VirtualPort {
    /// Wildcard port resolved by the kernel on listen
    pub const ANY: VirtualPort = VirtualPort(0);

    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub const fn is_any(&self) -> bool {
        self.0 == 0
    }
}

impl From<u16> for VirtualPort {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

impl fmt::Display for VirtualPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}
