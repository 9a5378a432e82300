//! # Inter-Process Communication (IPC)
//!
//! Raw message channels between execution contexts.
//!
//! ## Philosophy
//!
//! - **Messages, not shared memory**: contexts only ever exchange owned values
//! - **Transfer, not copy**: payload buffers and channel endpoints move into a
//!   message and out the other side
//! - **Tagged frames**: every frame on the wire has a short tag for tracing
//!
//! ## Architecture
//!
//! A [`MessagePort`] is one end of a bidirectional channel. Ports give no
//! acknowledgement and no back-pressure of their own; reliable streams and
//! request/response tunnels are layered on top by other crates using the
//! frame types in [`message`].

pub mod channel;
pub mod message;
pub mod signal;

pub use channel::{ChannelClosed, ChannelId, MessagePort, PortReceiver, PortSender};
pub use message::{ListenerFrame, StreamFrame, StreamPort};
pub use signal::CloseSignal;
