//! Channel abstraction for message passing

use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a communication channel
///
/// Both ends of one channel share the same id, which makes frame traces from
/// the two sides easy to line up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Creates a new random channel ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

/// The other end of the channel is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Channel closed")]
pub struct ChannelClosed;

/// One end of a bidirectional channel
///
/// Sends `Tx` values and receives `Rx` values. Ends are created in pairs by
/// [`MessagePort::pair`] and may themselves be moved inside messages, which
/// is how a listener hands a fresh connection endpoint to its accepter.
pub struct MessagePort<Tx, Rx = Tx> {
    id: ChannelId,
    tx: mpsc::UnboundedSender<Tx>,
    rx: mpsc::UnboundedReceiver<Rx>,
}

impl<Tx, Rx> MessagePort<Tx, Rx> {
    /// Creates two connected ends
    pub fn pair() -> (MessagePort<Tx, Rx>, MessagePort<Rx, Tx>) {
        let id = ChannelId::new();
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MessagePort {
                id,
                tx: a_tx,
                rx: a_rx,
            },
            MessagePort {
                id,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Posts a message to the other end without waiting
    pub fn post(&self, message: Tx) -> Result<(), ChannelClosed> {
        self.tx.send(message).map_err(|_| ChannelClosed)
    }

    /// Waits for the next message; `None` once the other end is dropped
    pub async fn recv(&mut self) -> Option<Rx> {
        self.rx.recv().await
    }

    /// Returns a cloneable sending half without consuming the port
    pub fn sender(&self) -> PortSender<Tx> {
        PortSender {
            id: self.id,
            tx: self.tx.clone(),
        }
    }

    /// Splits the port so sending and receiving can live in different tasks
    pub fn split(self) -> (PortSender<Tx>, PortReceiver<Rx>) {
        (
            PortSender {
                id: self.id,
                tx: self.tx,
            },
            PortReceiver {
                id: self.id,
                rx: self.rx,
            },
        )
    }
}

impl<Tx, Rx> fmt::Debug for MessagePort<Tx, Rx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort").field("id", &self.id).finish()
    }
}

/// Sending half of a [`MessagePort`]
pub struct PortSender<Tx> {
    id: ChannelId,
    tx: mpsc::UnboundedSender<Tx>,
}

impl<Tx> PortSender<Tx> {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Posts a message to the other end without waiting
    pub fn post(&self, message: Tx) -> Result<(), ChannelClosed> {
        self.tx.send(message).map_err(|_| ChannelClosed)
    }

    /// Checks whether the receiving end has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<Tx> Clone for PortSender<Tx> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
        }
    }
}

impl<Tx> fmt::Debug for PortSender<Tx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortSender").field("id", &self.id).finish()
    }
}

/// Receiving half of a [`MessagePort`]
pub struct PortReceiver<Rx> {
    id: ChannelId,
    rx: mpsc::UnboundedReceiver<Rx>,
}

impl<Rx> PortReceiver<Rx> {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Waits for the next message; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<Rx> {
        self.rx.recv().await
    }

    /// Takes a message if one is already queued
    pub fn try_recv(&mut self) -> Option<Rx> {
        self.rx.try_recv().ok()
    }

    /// Refuses further messages; already queued ones stay readable
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<Rx> fmt::Debug for PortReceiver<Rx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortReceiver").field("id", &self.id).finish()
    }
}
