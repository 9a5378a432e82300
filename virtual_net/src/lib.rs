//! # Virtual Network
//!
//! TCP-like streams and listeners built on raw message channels.
//!
//! A raw channel gives no acknowledgement and no back-pressure. [`AckedConn`]
//! adds both with a window of one: every `message` frame is answered with an
//! `ack` once it lands in the receiver's bounded buffer, and a writer does not
//! send again until that ack arrives. A receiver whose buffer is full closes
//! the connection instead of dropping data or stalling its peer.
//!
//! [`Listener`] turns `connection` frames carrying fresh channel endpoints
//! into accepted connections, rejecting new ones when its backlog is full.

pub mod addr;
pub mod conn;
pub mod deadline;
pub mod listener;

pub use addr::{parse_tcp_address, ConnAddr};
pub use conn::{AckedConn, CloseCallback};
pub use deadline::{deadline_after, race};
pub use listener::Listener;
