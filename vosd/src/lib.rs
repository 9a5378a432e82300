//! # vosd Host Runtime
//!
//! This crate hosts the simulated kernel and runs demo guests against it.
//!
//! ## Philosophy
//!
//! - **Kernel is an object**: Built once here and handed to everything that needs it
//! - **Guests are processes**: Demos run nested and talk to the kernel only by tunnel
//! - **Output is attributed**: Every console line carries the pid that wrote it
//!
//! ## Non-Responsibilities
//!
//! The host does NOT:
//! - Open real sockets or spawn real processes
//! - Fetch or build guest artifacts
//! - Persist files between runs

pub mod demos;
pub mod runtime;

pub use runtime::{Demo, DemoReport, VosdConfig, VosdError, VosdRuntime};
