//! Listener bound to a virtual port

use crate::{AckedConn, CloseCallback, ConnAddr};
use core_types::{Handle, VirtualPort};
use ipc::{CloseSignal, ListenerFrame, MessagePort, PortReceiver, PortSender, StreamFrame};
use kernel_api::{KernelError, KernelResult, StreamLimits};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

struct Shared {
    handle: Handle,
    port: VirtualPort,
    outbound: PortSender<ListenerFrame>,
    closed: CloseSignal,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Shared {
    fn close_local(&self) -> bool {
        if !self.closed.close() {
            return false;
        }

        let _ = self.outbound.post(ListenerFrame::Close);
        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }

        tracing::debug!(handle = %self.handle, port = %self.port, "listener closed");
        true
    }
}

/// Accepts connections delivered to one bound port
///
/// Inbound `connection` frames are turned into [`AckedConn`]s and parked in a
/// bounded backlog until [`Listener::accept`] claims them. When the backlog
/// is full the new connection is closed on arrival.
pub struct Listener {
    shared: Arc<Shared>,
    backlog: tokio::sync::Mutex<mpsc::Receiver<AckedConn>>,
}

impl Listener {
    /// Wraps the listener end of a channel; must run inside a Tokio runtime
    pub fn new(
        handle: Handle,
        port: VirtualPort,
        channel: MessagePort<ListenerFrame>,
        limits: StreamLimits,
    ) -> Self {
        let (outbound, inbound) = channel.split();
        let (backlog_tx, backlog_rx) = mpsc::channel(limits.listener_backlog.max(1));

        let shared = Arc::new(Shared {
            handle,
            port,
            outbound,
            closed: CloseSignal::new(),
            on_close: Mutex::new(None),
        });

        tokio::spawn(accept_loop(shared.clone(), inbound, backlog_tx, limits));

        Self {
            shared,
            backlog: tokio::sync::Mutex::new(backlog_rx),
        }
    }

    pub fn with_on_close(self, callback: impl FnOnce() + Send + 'static) -> Self {
        *self
            .shared
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self
    }

    pub fn handle(&self) -> Handle {
        self.shared.handle
    }

    pub fn port(&self) -> VirtualPort {
        self.shared.port
    }

    pub fn addr(&self) -> ConnAddr {
        ConnAddr::Port(self.shared.port)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_closed()
    }

    /// Waits for the next connection, or `Closed` once the listener closes
    pub async fn accept(&self) -> KernelResult<AckedConn> {
        if self.is_closed() {
            return Err(KernelError::Closed);
        }

        let mut backlog = self.backlog.lock().await;
        tokio::select! {
            conn = backlog.recv() => conn.ok_or(KernelError::Closed),
            _ = self.shared.closed.closed() => {
                // close() could not take the backlog while we held it
                close_backlog(&mut backlog);
                Err(KernelError::Closed)
            }
        }
    }

    /// Stops accepting, closes unclaimed connections and runs the teardown hook
    ///
    /// Idempotent.
    pub fn close(&self) -> KernelResult<()> {
        if self.shared.close_local() {
            self.drain_backlog();
        }
        Ok(())
    }

    fn drain_backlog(&self) {
        if let Ok(mut backlog) = self.backlog.try_lock() {
            close_backlog(&mut backlog);
        }
    }
}

fn close_backlog(backlog: &mut mpsc::Receiver<AckedConn>) {
    backlog.close();
    while let Ok(conn) = backlog.try_recv() {
        let _ = conn.close();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shared.close_local();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("handle", &self.shared.handle)
            .field("port", &self.shared.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    mut inbound: PortReceiver<ListenerFrame>,
    backlog: mpsc::Sender<AckedConn>,
    limits: StreamLimits,
) {
    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame,
            _ = shared.closed.closed() => break,
        };

        match frame {
            Some(ListenerFrame::Connection { peer, endpoint }) => {
                let conn = AckedConn::new(
                    ConnAddr::Port(shared.port),
                    peer.map(ConnAddr::Handle),
                    endpoint,
                    limits,
                );
                match backlog.try_send(conn) {
                    Ok(()) => {
                        tracing::debug!(port = %shared.port, ?peer, "connection queued");
                    }
                    Err(TrySendError::Full(conn)) => {
                        tracing::warn!(port = %shared.port, ?peer, "backlog full, rejecting connection");
                        let _ = conn.close();
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Some(ListenerFrame::Close) | None => {
                shared.close_local();
                break;
            }
        }
    }

    // dials that raced the close already returned; their peers must see the end
    inbound.close();
    while let Some(frame) = inbound.try_recv() {
        if let ListenerFrame::Connection { peer, endpoint } = frame {
            tracing::debug!(port = %shared.port, ?peer, "listener closed, rejecting connection");
            let _ = endpoint.post(StreamFrame::Close);
        }
    }
}
