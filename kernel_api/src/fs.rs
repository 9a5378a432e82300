//! Contract for a pluggable file backend
//!
//! The kernel does not know how files are stored. It forwards descriptor
//! operations to whatever [`FileSystem`] it was built with.

use crate::KernelResult;
use bitflags::bitflags;

/// `fcntl` command: read the open flags
pub const F_GETFL: i32 = 3;
/// `fcntl` command: change the open flags
pub const F_SETFL: i32 = 4;

bitflags! {
    /// Access mode and creation flags for [`FileSystem::open`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND = 1 << 4;
    }
}

impl OpenFlags {
    pub fn readable(&self) -> bool {
        self.contains(OpenFlags::READ)
    }

    pub fn writable(&self) -> bool {
        self.contains(OpenFlags::WRITE)
    }
}

/// A file backend
///
/// Descriptors returned by `open` belong to the backend; the kernel wraps
/// each in a handle of its own before a guest sees it.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags, perm: u32) -> KernelResult<u64>;

    /// Reads into `buf`; `Ok(0)` means end of file
    fn read(&self, fd: u64, buf: &mut [u8]) -> KernelResult<usize>;

    fn write(&self, fd: u64, data: &[u8]) -> KernelResult<usize>;

    fn close(&self, fd: u64) -> KernelResult<()>;

    fn fcntl(&self, fd: u64, cmd: i32, arg: u64) -> KernelResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode() {
        let flags = OpenFlags::READ | OpenFlags::CREATE;
        assert!(flags.readable());
        assert!(!flags.writable());
        assert_eq!(OpenFlags::from_bits(flags.bits()), Some(flags));
    }
}
