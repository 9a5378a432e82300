//! Acked stream connection
//!
//! Wire protocol on the underlying channel:
//!
//! - `message(payload)`: data; answered by exactly one `ack`
//! - `ack`: the previous `message` is in the receiver's buffer
//! - `close`: the sender tore down its end
//!
//! A writer holds the single ack slot from send until ack, so at most one
//! message is ever unacknowledged per direction. The ack is sent on receipt
//! into the buffer, not when the reader consumes it.

use crate::deadline::race;
use crate::ConnAddr;
use ipc::{CloseSignal, PortReceiver, PortSender, StreamFrame, StreamPort};
use kernel_api::{KernelError, KernelResult, StreamLimits};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

/// Teardown hook run once when a stream or listener closes locally
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default, Clone, Copy)]
struct Deadlines {
    read: Option<Instant>,
    write: Option<Instant>,
}

struct Shared {
    local: ConnAddr,
    peer: Option<ConnAddr>,
    outbound: PortSender<StreamFrame>,
    /// Closed locally: explicit close or receive-buffer overflow
    closed: CloseSignal,
    /// The peer sent `close`
    peer_closed: CloseSignal,
    on_close: Mutex<Option<CloseCallback>>,
    deadlines: Mutex<Deadlines>,
}

impl Shared {
    fn close_local(&self) -> bool {
        if !self.closed.close() {
            return false;
        }

        let _ = self.outbound.post(StreamFrame::Close);
        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }

        tracing::debug!(local = %self.local, "connection closed");
        true
    }

    fn deadlines(&self) -> Deadlines {
        *self.deadlines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_deadlines(&self, f: impl FnOnce(&mut Deadlines)) {
        f(&mut self.deadlines.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

struct ReadState {
    buffered: mpsc::Receiver<Vec<u8>>,
    /// Unread tail of a message larger than the caller's buffer
    partial: Vec<u8>,
    offset: usize,
}

/// A reliable, ordered, bidirectional byte stream over one channel
///
/// Must be created inside a Tokio runtime: construction spawns the task that
/// receives frames, fills the buffer, and answers with acks.
///
/// Reads and writes take `&self` so one task can read while another writes.
/// Concurrent readers are serialized but interleave unpredictably; treat the
/// read side as single-reader.
pub struct AckedConn {
    shared: Arc<Shared>,
    reader: tokio::sync::Mutex<ReadState>,
    acks: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl AckedConn {
    /// Wraps one end of a stream channel
    pub fn new(
        local: ConnAddr,
        peer: Option<ConnAddr>,
        port: StreamPort,
        limits: StreamLimits,
    ) -> Self {
        let (outbound, inbound) = port.split();
        let (buffer_tx, buffer_rx) = mpsc::channel(limits.recv_buffer_capacity.max(1));
        let (ack_tx, ack_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            local,
            peer,
            outbound,
            closed: CloseSignal::new(),
            peer_closed: CloseSignal::new(),
            on_close: Mutex::new(None),
            deadlines: Mutex::new(Deadlines::default()),
        });

        tokio::spawn(receive_loop(shared.clone(), inbound, buffer_tx, ack_tx));

        Self {
            shared,
            reader: tokio::sync::Mutex::new(ReadState {
                buffered: buffer_rx,
                partial: Vec::new(),
                offset: 0,
            }),
            acks: tokio::sync::Mutex::new(ack_rx),
        }
    }

    /// Installs the teardown hook run by the first local close
    pub fn with_on_close(self, callback: impl FnOnce() + Send + 'static) -> Self {
        *self
            .shared
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self
    }

    pub fn local_addr(&self) -> ConnAddr {
        self.shared.local
    }

    pub fn peer_addr(&self) -> Option<ConnAddr> {
        self.shared.peer
    }

    /// True after a local close or a buffer overflow
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_closed()
    }

    /// True once the peer has sent `close`
    pub fn is_peer_closed(&self) -> bool {
        self.shared.peer_closed.is_closed()
    }

    /// Sets both deadlines; `None` blocks indefinitely
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.shared.update_deadlines(|d| {
            d.read = deadline;
            d.write = deadline;
        });
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.shared.update_deadlines(|d| d.read = deadline);
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.shared.update_deadlines(|d| d.write = deadline);
    }

    /// Sends `data` as one message and waits for its ack
    ///
    /// On timeout the message is not retracted; the peer may still get it.
    pub async fn write(&self, data: &[u8]) -> KernelResult<usize> {
        if self.is_closed() || self.is_peer_closed() {
            return Err(KernelError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let deadline = self.shared.deadlines().write;
        let shared = &self.shared;
        let acks = &self.acks;

        let acked = race(deadline, async move {
            let mut acks = acks.lock().await;
            // acks owed to earlier writes that timed out
            while acks.try_recv().is_ok() {}

            shared
                .outbound
                .post(StreamFrame::Message(data.to_vec()))
                .map_err(|_| KernelError::Closed)?;
            tracing::trace!(local = %shared.local, len = data.len(), "SND");

            tokio::select! {
                ack = acks.recv() => ack.ok_or(KernelError::Closed),
                _ = shared.closed.closed() => Err(KernelError::Closed),
            }
        })
        .await?;

        acked.map(|()| data.len())
    }

    /// Reads buffered bytes, waiting for a message if none are buffered
    ///
    /// Returns `Ok(0)` once the peer has closed and the buffer is drained.
    pub async fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Err(KernelError::invalid("empty read buffer"));
        }
        if self.is_closed() {
            return Err(KernelError::Closed);
        }

        let deadline = self.shared.deadlines().read;
        let closed = &self.shared.closed;
        let reader = &self.reader;

        race(deadline, async move {
            let mut state = reader.lock().await;
            if state.offset < state.partial.len() {
                return Ok(state.take_partial(buf));
            }

            let next = tokio::select! {
                payload = state.buffered.recv() => payload,
                _ = closed.closed() => return Err(KernelError::Closed),
            };

            match next {
                Some(payload) => {
                    state.partial = payload;
                    state.offset = 0;
                    Ok(state.take_partial(buf))
                }
                None => Ok(0),
            }
        })
        .await?
    }

    /// Sends `close` to the peer and runs the teardown hook
    ///
    /// Idempotent.
    pub fn close(&self) -> KernelResult<()> {
        self.shared.close_local();
        Ok(())
    }
}

impl ReadState {
    fn take_partial(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.partial[self.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        if self.offset >= self.partial.len() {
            self.partial.clear();
            self.offset = 0;
        }
        n
    }
}

impl Drop for AckedConn {
    fn drop(&mut self) {
        self.shared.close_local();
    }
}

impl std::fmt::Debug for AckedConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckedConn")
            .field("local", &self.shared.local)
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut inbound: PortReceiver<StreamFrame>,
    buffer: mpsc::Sender<Vec<u8>>,
    acks: mpsc::Sender<()>,
) {
    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame,
            _ = shared.closed.closed() => break,
        };

        match frame {
            Some(StreamFrame::Message(payload)) => {
                let len = payload.len();
                match buffer.try_send(payload) {
                    Ok(()) => {
                        tracing::trace!(local = %shared.local, len, "RCV");
                        let _ = shared.outbound.post(StreamFrame::Ack);
                    }
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            local = %shared.local,
                            "receive buffer full, closing connection"
                        );
                        shared.close_local();
                        break;
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Some(StreamFrame::Ack) => {
                tracing::trace!(local = %shared.local, "ACK");
                if acks.try_send(()).is_err() {
                    tracing::debug!(local = %shared.local, "unexpected ack ignored");
                }
            }
            Some(StreamFrame::Close) | None => {
                shared.peer_closed.close();
                tracing::debug!(local = %shared.local, "peer closed connection");
                break;
            }
        }
    }
}
