//! # Simulated Kernel
//!
//! A user-space kernel that owns every handle-addressed resource: listeners,
//! connections, pipes, files, and the processes it started.
//!
//! ## Purpose
//!
//! Guest programs get a POSIX-flavoured surface without real sockets or
//! real processes:
//! - Loopback TCP over virtual ports, with acknowledged writes
//! - Pipes and files behind the same handle space
//! - Nested processes that reach the owning kernel through a tunnel
//! - Console output attributed to the writing process
//!
//! ## Philosophy
//!
//! **One table, one allocator.**
//!
//! Every handle the kernel hands out comes from a single allocator and
//! lives in a single table, whichever context asked for it. A nested
//! process holds no resources of its own; it borrows the owner's through
//! [`GuestKernel`], so a listener opened by a child is reachable by its
//! parent and the other way round.

mod guest;
mod host;
mod kernel;
mod memfs;
mod pipe;
mod process;
mod resource_table;
mod syscalls;

pub use guest::{run_guest, GuestContext, GuestKernel};
pub use host::{
    ArtifactResolver, ExecutionHost, GuestProgram, LaunchSpec, StaticResolver, TaskHost,
    WorkerInstance,
};
pub use kernel::{Kernel, KernelBuilder, WeakKernel};
pub use memfs::MemoryFileSystem;
pub use resource_table::ResourceKind;
pub use syscalls::{dial_address, listen_address, write_all, Syscalls};
