//! Call/response tunnel that forwards kernel operations between contexts.
//!
//! A nested execution context holds an [`RpcClient`]; the resource owner runs
//! an [`RpcServer`] on the other end of the same channel. Requests and
//! replies are closed sets of typed variants, so a server handles every
//! method exhaustively and a client can only ask for what exists.
//!
//! There is no request correlation id. A client allows one outstanding call
//! at a time and a server answers strictly in arrival order.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::{
    ClientPort, ErrorKind, KernelRequest, KernelResponse, RpcError, RpcReply, ServerPort,
};
pub use server::{RpcHandler, RpcServer};

/// Creates the two ends of a tunnel
pub fn tunnel() -> (ClientPort, ServerPort) {
    ipc::MessagePort::pair()
}
