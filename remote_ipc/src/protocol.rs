//! Typed tunnel messages

use core_types::{Handle, VirtualPort};
use ipc::{ListenerFrame, MessagePort, StreamPort};
use kernel_api::{ExitStatus, KernelError, ProcAttr};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Client end of a tunnel
pub type ClientPort = MessagePort<KernelRequest, RpcReply>;

/// Server end of a tunnel
pub type ServerPort = MessagePort<RpcReply, KernelRequest>;

/// One reply per request: `results` or `error`
pub type RpcReply = Result<KernelResponse, RpcError>;

/// Operations a nested context may ask its owner to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum KernelRequest {
    Dial { port: VirtualPort },
    Listen { port: VirtualPort },
    Close { handle: Handle },
    Read { handle: Handle, size: usize },
    Write { handle: Handle, data: Vec<u8> },
    StartProcess {
        argv0: String,
        args: Vec<String>,
        attr: ProcAttr,
    },
    NextHandle,
    Exit,
    Pipe,
    Wait { pid: Handle },
}

impl KernelRequest {
    /// Method name used on the wire and in traces
    pub fn method(&self) -> &'static str {
        match self {
            KernelRequest::Dial { .. } => "Dial",
            KernelRequest::Listen { .. } => "Listen",
            KernelRequest::Close { .. } => "Close",
            KernelRequest::Read { .. } => "Read",
            KernelRequest::Write { .. } => "Write",
            KernelRequest::StartProcess { .. } => "StartProcess",
            KernelRequest::NextHandle => "NextHandle",
            KernelRequest::Exit => "Exit",
            KernelRequest::Pipe => "Pipe",
            KernelRequest::Wait { .. } => "Wait",
        }
    }
}

/// Successful results
///
/// Stream and listener endpoints travel inside the reply, handing the caller
/// its end of a freshly created channel.
pub enum KernelResponse {
    Dialed {
        handle: Handle,
        port: VirtualPort,
        endpoint: StreamPort,
    },
    Listening {
        handle: Handle,
        port: VirtualPort,
        endpoint: MessagePort<ListenerFrame>,
    },
    Closed,
    Data(Vec<u8>),
    Written(usize),
    Started { pid: Handle },
    Handle(Handle),
    Exited,
    Pipe { reader: Handle, writer: Handle },
    Waited(ExitStatus),
}

impl KernelResponse {
    pub fn tag(&self) -> &'static str {
        match self {
            KernelResponse::Dialed { .. } => "Dialed",
            KernelResponse::Listening { .. } => "Listening",
            KernelResponse::Closed => "Closed",
            KernelResponse::Data(_) => "Data",
            KernelResponse::Written(_) => "Written",
            KernelResponse::Started { .. } => "Started",
            KernelResponse::Handle(_) => "Handle",
            KernelResponse::Exited => "Exited",
            KernelResponse::Pipe { .. } => "Pipe",
            KernelResponse::Waited(_) => "Waited",
        }
    }

    /// Error for a reply that does not match the request
    pub fn unexpected(self, method: &str) -> KernelError {
        KernelError::Protocol(format!("{} reply to {}", self.tag(), method))
    }
}

impl fmt::Debug for KernelResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelResponse::Dialed { handle, port, .. } => f
                .debug_struct("Dialed")
                .field("handle", handle)
                .field("port", port)
                .finish_non_exhaustive(),
            KernelResponse::Listening { handle, port, .. } => f
                .debug_struct("Listening")
                .field("handle", handle)
                .field("port", port)
                .finish_non_exhaustive(),
            KernelResponse::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            KernelResponse::Written(n) => f.debug_tuple("Written").field(n).finish(),
            KernelResponse::Started { pid } => {
                f.debug_struct("Started").field("pid", pid).finish()
            }
            KernelResponse::Handle(handle) => f.debug_tuple("Handle").field(handle).finish(),
            KernelResponse::Pipe { reader, writer } => f
                .debug_struct("Pipe")
                .field("reader", reader)
                .field("writer", writer)
                .finish(),
            KernelResponse::Waited(status) => f.debug_tuple("Waited").field(status).finish(),
            other => f.write_str(other.tag()),
        }
    }
}

/// Error kinds aligned with KernelError variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    Unavailable,
    AlreadyBound,
    Timeout,
    NotImplemented,
    Closed,
    Canceled,
    NotFound,
    PermissionDenied,
    SpawnFailed,
    Protocol,
}

/// Serializable error carried by an `error` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    pub port: Option<VirtualPort>,
}

impl RpcError {
    fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            port: None,
        }
    }

    fn with_port(kind: ErrorKind, port: VirtualPort, message: String) -> Self {
        Self {
            kind,
            message,
            port: Some(port),
        }
    }
}

impl From<KernelError> for RpcError {
    fn from(error: KernelError) -> Self {
        let message = error.to_string();
        match error {
            KernelError::InvalidArgument(detail) => RpcError::new(ErrorKind::InvalidArgument, detail),
            KernelError::Unavailable(port) => {
                RpcError::with_port(ErrorKind::Unavailable, port, message)
            }
            KernelError::AlreadyBound(port) => {
                RpcError::with_port(ErrorKind::AlreadyBound, port, message)
            }
            KernelError::Timeout => RpcError::new(ErrorKind::Timeout, message),
            KernelError::NotImplemented(detail) => RpcError::new(ErrorKind::NotImplemented, detail),
            KernelError::Closed => RpcError::new(ErrorKind::Closed, message),
            KernelError::Canceled => RpcError::new(ErrorKind::Canceled, message),
            KernelError::NotFound(detail) => RpcError::new(ErrorKind::NotFound, detail),
            KernelError::PermissionDenied(detail) => {
                RpcError::new(ErrorKind::PermissionDenied, detail)
            }
            KernelError::SpawnFailed(detail) => RpcError::new(ErrorKind::SpawnFailed, detail),
            KernelError::Protocol(detail) => RpcError::new(ErrorKind::Protocol, detail),
        }
    }
}

impl From<RpcError> for KernelError {
    fn from(error: RpcError) -> Self {
        let port = error.port.unwrap_or(VirtualPort::ANY);
        match error.kind {
            ErrorKind::InvalidArgument => KernelError::InvalidArgument(error.message),
            ErrorKind::Unavailable => KernelError::Unavailable(port),
            ErrorKind::AlreadyBound => KernelError::AlreadyBound(port),
            ErrorKind::Timeout => KernelError::Timeout,
            ErrorKind::NotImplemented => KernelError::NotImplemented(error.message),
            ErrorKind::Closed => KernelError::Closed,
            ErrorKind::Canceled => KernelError::Canceled,
            ErrorKind::NotFound => KernelError::NotFound(error.message),
            ErrorKind::PermissionDenied => KernelError::PermissionDenied(error.message),
            ErrorKind::SpawnFailed => KernelError::SpawnFailed(error.message),
            ErrorKind::Protocol => KernelError::Protocol(error.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_tag() {
        let request = KernelRequest::Read {
            handle: Handle::from_raw(10_003),
            size: 512,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "Read");
        assert_eq!(json["handle"], 10_003);

        let back: KernelRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
        assert_eq!(back.method(), "Read");
    }

    #[test]
    fn test_error_kinds_survive_the_tunnel() {
        let errors = vec![
            KernelError::invalid("bad fd"),
            KernelError::Unavailable(VirtualPort::new(7000)),
            KernelError::AlreadyBound(VirtualPort::new(7001)),
            KernelError::Timeout,
            KernelError::not_implemented("stdin"),
            KernelError::Closed,
            KernelError::Canceled,
            KernelError::NotFound("pid".to_string()),
            KernelError::PermissionDenied("read".to_string()),
            KernelError::SpawnFailed("build failed: exit 1".to_string()),
            KernelError::Protocol("mismatch".to_string()),
        ];

        for error in errors {
            let wire: RpcError = error.clone().into();
            let json = serde_json::to_string(&wire).unwrap();
            let decoded: RpcError = serde_json::from_str(&json).unwrap();
            assert_eq!(KernelError::from(decoded), error);
        }
    }

    #[test]
    fn test_unexpected_reply() {
        let err = KernelResponse::Closed.unexpected("Dial");
        assert_eq!(err, KernelError::Protocol("Closed reply to Dial".to_string()));
    }
}
