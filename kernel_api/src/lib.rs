//! # Kernel API
//!
//! Shared vocabulary between guest code, the resource-owning kernel, and the
//! tunnel that connects them.
//!
//! ## Philosophy
//!
//! The kernel emulates a small POSIX-like surface (streams, listeners, pipes,
//! processes, files) purely with message passing. Everything a caller can get
//! back is described here:
//! - [`KernelError`]: the error taxonomy, with an [`Errno`] mapping
//! - [`KernelConfig`]: tunables loaded once at startup
//! - [`ProcAttr`] / [`ExitStatus`]: process spawn attributes and outcomes
//! - [`FileSystem`]: the contract a pluggable file backend implements
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A general POSIX filesystem
//! - A security boundary beyond what the host context already offers

pub mod config;
pub mod error;
pub mod fs;
pub mod process;

pub use config::{ConfigError, KernelConfig, StreamLimits};
pub use error::{Errno, KernelError, KernelResult};
pub use fs::{FileSystem, OpenFlags, F_GETFL, F_SETFL};
pub use process::{ExitStatus, ProcAttr};

use std::future::Future;
use std::pin::Pin;

/// Boxed future used where a collaborator must stay object safe
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
