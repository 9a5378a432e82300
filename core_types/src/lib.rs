//! # Core Types
//!
//! Fundamental identifiers shared by every layer of the virtual OS surface.
//!
//! ## Philosophy
//!
//! - **Distinct namespaces**: a [`Handle`] and a [`VirtualPort`] are different
//!   types, so a port number can never be looked up as a handle by accident.
//! - **Never reused**: handles come from one monotonic [`HandleAllocator`].
//!
//! ## Key Types
//!
//! - [`Handle`]: identifier of a kernel-managed resource (connection, listener,
//!   pipe end, process, file)
//! - [`VirtualPort`]: bindable address for listen/dial
//! - [`HandleAllocator`]: the single source of fresh handles

pub mod allocator;
pub mod ids;

pub use allocator::HandleAllocator;
pub use ids::{Handle, VirtualPort};
