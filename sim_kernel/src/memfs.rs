//! In-memory file backend

use kernel_api::{FileSystem, KernelError, KernelResult, OpenFlags, F_GETFL};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

const DEV_NULL: &str = "/dev/null";

/// Backend descriptors start above the console range
const FIRST_FD: u64 = 3;

struct OpenFile {
    path: String,
    flags: OpenFlags,
    /// Private copy, written back to the store on close
    data: Vec<u8>,
    pos: usize,
    dirty: bool,
    null: bool,
}

#[derive(Default)]
struct State {
    files: HashMap<String, Vec<u8>>,
    open: HashMap<u64, OpenFile>,
    next_fd: u64,
}

/// Files kept in a map, flushed on close
///
/// `/dev/null` always exists: reads hit end of file and writes vanish.
#[derive(Default)]
pub struct MemoryFileSystem {
    state: Mutex<State>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file
    pub fn with_file(self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.lock().files.insert(path.into(), contents.into());
        self
    }

    /// Stored contents of `path`, as of the last close
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bad_fd(fd: u64) -> KernelError {
    KernelError::invalid(format!("bad file descriptor {fd}"))
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &str, flags: OpenFlags, _perm: u32) -> KernelResult<u64> {
        let mut state = self.lock();

        let file = if path == DEV_NULL {
            OpenFile {
                path: path.to_string(),
                flags,
                data: Vec::new(),
                pos: 0,
                dirty: false,
                null: true,
            }
        } else {
            let (mut data, created) = match state.files.get(path) {
                Some(existing) => (existing.clone(), false),
                None if flags.contains(OpenFlags::CREATE) => (Vec::new(), true),
                None => return Err(KernelError::NotFound(path.to_string())),
            };
            let truncated = flags.contains(OpenFlags::TRUNCATE) && !data.is_empty();
            if truncated {
                data.clear();
            }
            let pos = if flags.contains(OpenFlags::APPEND) {
                data.len()
            } else {
                0
            };
            OpenFile {
                path: path.to_string(),
                flags,
                data,
                pos,
                dirty: created || truncated,
                null: false,
            }
        };

        let fd = FIRST_FD + state.next_fd;
        state.next_fd += 1;
        state.open.insert(fd, file);
        Ok(fd)
    }

    fn read(&self, fd: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let mut state = self.lock();
        let file = state.open.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        if file.null {
            return Ok(0);
        }
        if !file.flags.readable() {
            return Err(KernelError::PermissionDenied(format!(
                "{} not open for reading",
                file.path
            )));
        }

        let remaining = file.data.get(file.pos..).unwrap_or_default();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        file.pos += n;
        Ok(n)
    }

    fn write(&self, fd: u64, data: &[u8]) -> KernelResult<usize> {
        let mut state = self.lock();
        let file = state.open.get_mut(&fd).ok_or_else(|| bad_fd(fd))?;
        if file.null {
            return Ok(data.len());
        }
        if !file.flags.writable() {
            return Err(KernelError::PermissionDenied(format!(
                "{} not open for writing",
                file.path
            )));
        }

        if file.flags.contains(OpenFlags::APPEND) {
            file.pos = file.data.len();
        }
        let end = file.pos + data.len();
        if end > file.data.len() {
            file.data.resize(end, 0);
        }
        file.data[file.pos..end].copy_from_slice(data);
        file.pos = end;
        file.dirty = true;
        Ok(data.len())
    }

    fn close(&self, fd: u64) -> KernelResult<()> {
        let mut state = self.lock();
        let file = state.open.remove(&fd).ok_or_else(|| bad_fd(fd))?;
        if file.dirty && !file.null {
            state.files.insert(file.path, file.data);
        }
        Ok(())
    }

    fn fcntl(&self, fd: u64, cmd: i32, _arg: u64) -> KernelResult<u64> {
        let state = self.lock();
        let file = state.open.get(&fd).ok_or_else(|| bad_fd(fd))?;
        match cmd {
            F_GETFL => Ok(u64::from(file.flags.bits())),
            other => Err(KernelError::PermissionDenied(format!(
                "fcntl command {other} not supported"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::F_SETFL;

    #[test]
    fn test_missing_file_without_create() {
        let fs = MemoryFileSystem::new();
        let err = fs.open("/etc/motd", OpenFlags::READ, 0).unwrap_err();
        assert_eq!(err, KernelError::NotFound("/etc/motd".to_string()));
    }

    #[test]
    fn test_create_write_close_flushes() {
        let fs = MemoryFileSystem::new();
        let fd = fs
            .open("/tmp/out", OpenFlags::WRITE | OpenFlags::CREATE, 0o644)
            .unwrap();
        fs.write(fd, b"hello").unwrap();
        assert!(fs.contents("/tmp/out").is_none());

        fs.close(fd).unwrap();
        assert_eq!(fs.contents("/tmp/out").unwrap(), b"hello");
    }

    #[test]
    fn test_read_until_eof() {
        let fs = MemoryFileSystem::new().with_file("/a", b"abc".to_vec());
        let fd = fs.open("/a", OpenFlags::READ, 0).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 2);
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 1);
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_truncate_and_append() {
        let fs = MemoryFileSystem::new().with_file("/log", b"old".to_vec());

        let fd = fs
            .open("/log", OpenFlags::WRITE | OpenFlags::TRUNCATE, 0)
            .unwrap();
        fs.write(fd, b"new").unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.contents("/log").unwrap(), b"new");

        let fd = fs
            .open("/log", OpenFlags::WRITE | OpenFlags::APPEND, 0)
            .unwrap();
        fs.write(fd, b"+more").unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.contents("/log").unwrap(), b"new+more");
    }

    #[test]
    fn test_access_mode_enforced() {
        let fs = MemoryFileSystem::new().with_file("/ro", b"x".to_vec());
        let fd = fs.open("/ro", OpenFlags::READ, 0).unwrap();
        assert!(matches!(
            fs.write(fd, b"y"),
            Err(KernelError::PermissionDenied(_))
        ));

        let fd = fs.open("/ro", OpenFlags::WRITE, 0).unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(
            fs.read(fd, &mut buf),
            Err(KernelError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_dev_null() {
        let fs = MemoryFileSystem::new();
        let fd = fs.open("/dev/null", OpenFlags::READ | OpenFlags::WRITE, 0).unwrap();
        assert_eq!(fs.write(fd, b"gone").unwrap(), 4);
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
        fs.close(fd).unwrap();
        assert!(fs.contents("/dev/null").is_none());
    }

    #[test]
    fn test_fcntl() {
        let fs = MemoryFileSystem::new().with_file("/a", b"".to_vec());
        let flags = OpenFlags::READ | OpenFlags::APPEND;
        let fd = fs.open("/a", flags, 0).unwrap();
        assert_eq!(fs.fcntl(fd, F_GETFL, 0).unwrap(), u64::from(flags.bits()));
        assert!(matches!(
            fs.fcntl(fd, F_SETFL, 0),
            Err(KernelError::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.fcntl(999, F_GETFL, 0),
            Err(KernelError::InvalidArgument(_))
        ));
    }
}
