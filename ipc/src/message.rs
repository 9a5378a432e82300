//! Frames exchanged over raw message channels

use crate::MessagePort;
use core_types::Handle;
use std::fmt;

/// Channel carrying one acked byte stream
pub type StreamPort = MessagePort<StreamFrame>;

/// Frames of the acked stream protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A payload; the receiver answers with exactly one [`StreamFrame::Ack`]
    Message(Vec<u8>),
    /// The previous payload landed in the receiver's buffer
    Ack,
    /// The sender has torn down its end
    Close,
}

impl StreamFrame {
    /// Wire tag used in traces
    pub fn tag(&self) -> &'static str {
        match self {
            StreamFrame::Message(_) => "message",
            StreamFrame::Ack => "ack",
            StreamFrame::Close => "close",
        }
    }
}

/// Frames delivered to a listener's channel
pub enum ListenerFrame {
    /// A dialer wants in; `endpoint` is the accepting side of its stream
    Connection {
        peer: Option<Handle>,
        endpoint: StreamPort,
    },
    /// The listener has been torn down
    Close,
}

impl ListenerFrame {
    pub fn tag(&self) -> &'static str {
        match self {
            ListenerFrame::Connection { .. } => "connection",
            ListenerFrame::Close => "close",
        }
    }
}

impl fmt::Debug for ListenerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerFrame::Connection { peer, endpoint } => f
                .debug_struct("Connection")
                .field("peer", peer)
                .field("channel", &endpoint.id())
                .finish(),
            ListenerFrame::Close => f.write_str("Close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_frame_tags() {
        assert_eq!(StreamFrame::Message(vec![1]).tag(), "message");
        assert_eq!(StreamFrame::Ack.tag(), "ack");
        assert_eq!(StreamFrame::Close.tag(), "close");
    }

    #[tokio::test]
    async fn test_connection_frame_transfers_endpoint() {
        let (mut listener_side, kernel_side) = MessagePort::<ListenerFrame>::pair();
        let (mut dialer, accepted) = StreamPort::pair();

        kernel_side
            .post(ListenerFrame::Connection {
                peer: Some(Handle::from_raw(10_000)),
                endpoint: accepted,
            })
            .unwrap();

        let frame = listener_side.recv().await.unwrap();
        assert_eq!(frame.tag(), "connection");
        let ListenerFrame::Connection { peer, endpoint } = frame else {
            panic!("expected connection frame");
        };
        assert_eq!(peer, Some(Handle::from_raw(10_000)));

        endpoint.post(StreamFrame::Message(b"hi".to_vec())).unwrap();
        assert_eq!(dialer.recv().await, Some(StreamFrame::Message(b"hi".to_vec())));
    }
}
