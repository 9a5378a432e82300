//! Process spawn attributes and exit outcomes

use core_types::Handle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attributes for starting a process
///
/// `files[0..3]` become the child's stdin, stdout and stderr. Missing or zero
/// entries fall back to the reserved console handles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcAttr {
    pub files: Vec<Handle>,
    pub env: Vec<String>,
    pub dir: Option<String>,
}

impl ProcAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(mut self, files: Vec<Handle>) -> Self {
        self.files = files;
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Handle to use for standard stream `index` (0, 1 or 2)
    pub fn stdio(&self, index: usize) -> Handle {
        match self.files.get(index) {
            Some(handle) if handle.as_raw() != 0 => *handle,
            _ => Handle::from_raw(index as u64),
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// The process called `exit` itself
    Exited,
    /// The owner closed the process handle, or it never launched
    Killed,
    /// The tunnel to the process dropped without an `exit`
    Disconnected,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited => write!(f, "exited"),
            ExitStatus::Killed => write!(f, "killed"),
            ExitStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}
