//! Tunnel client

use crate::protocol::{ClientPort, KernelRequest, KernelResponse};
use kernel_api::{KernelError, KernelResult};
use tokio::sync::Mutex;

struct ClientState {
    port: ClientPort,
    /// A request was posted but its caller stopped waiting for the reply
    pending: bool,
}

/// Issues requests over a tunnel, one at a time
///
/// Concurrent callers queue on an internal lock, so replies can never be
/// handed to the wrong caller. A caller that gives up mid-call (its future is
/// dropped) leaves the reply in flight; the next call discards it first.
pub struct RpcClient {
    state: Mutex<ClientState>,
}

impl RpcClient {
    pub fn new(port: ClientPort) -> Self {
        Self {
            state: Mutex::new(ClientState {
                port,
                pending: false,
            }),
        }
    }

    /// Sends `request` and waits for its reply
    pub async fn invoke(&self, request: KernelRequest) -> KernelResult<KernelResponse> {
        let mut state = self.state.lock().await;

        if state.pending {
            let stale = state.port.recv().await.ok_or(KernelError::Closed)?;
            tracing::debug!(reply = ?stale.map(|r| r.tag()), "discarded stale reply");
            state.pending = false;
        }

        let method = request.method();
        state
            .port
            .post(request)
            .map_err(|_| KernelError::Closed)?;
        state.pending = true;

        let reply = state.port.recv().await.ok_or(KernelError::Closed)?;
        state.pending = false;

        tracing::trace!(method, ok = reply.is_ok(), "rpc reply");
        reply.map_err(KernelError::from)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}
