//! Tunnel server

use crate::protocol::{KernelRequest, KernelResponse, RpcError, ServerPort};
use kernel_api::KernelResult;
use std::future::Future;
use tokio::task::JoinHandle;

/// Executes requests arriving on a tunnel
pub trait RpcHandler: Send + Sync + 'static {
    fn handle(
        &self,
        request: KernelRequest,
    ) -> impl Future<Output = KernelResult<KernelResponse>> + Send;
}

/// Single dispatch loop over one tunnel
///
/// Requests are handled one at a time in arrival order. A slow handler delays
/// everything behind it but never reorders replies.
pub struct RpcServer;

impl RpcServer {
    /// Runs [`RpcServer::serve`] on a new task
    pub fn spawn<H: RpcHandler>(port: ServerPort, handler: H) -> JoinHandle<()> {
        tokio::spawn(Self::serve(port, handler))
    }

    /// Serves until the client end of the tunnel goes away
    pub async fn serve<H: RpcHandler>(mut port: ServerPort, handler: H) {
        let channel = port.id();
        while let Some(request) = port.recv().await {
            let method = request.method();
            let reply = handler.handle(request).await.map_err(RpcError::from);
            if let Err(err) = &reply {
                tracing::debug!(%channel, method, error = %err, "rpc returned error");
            } else {
                tracing::trace!(%channel, method, "rpc returned results");
            }

            if port.post(reply).is_err() {
                break;
            }
        }
        tracing::debug!(%channel, "rpc server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tunnel, RpcClient};
    use core_types::{Handle, VirtualPort};
    use kernel_api::KernelError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct MockKernel {
        next: AtomicU64,
        log: Mutex<Vec<String>>,
    }

    impl RpcHandler for Arc<MockKernel> {
        async fn handle(&self, request: KernelRequest) -> KernelResult<KernelResponse> {
            let entry = match &request {
                KernelRequest::Write { data, .. } => format!("Write {}", data.len()),
                other => other.method().to_string(),
            };
            self.log.lock().unwrap().push(entry);
            match request {
                KernelRequest::NextHandle => Ok(KernelResponse::Handle(Handle::from_raw(
                    10_000 + self.next.fetch_add(1, Ordering::SeqCst),
                ))),
                KernelRequest::Write { data, .. } => {
                    // bigger writes take longer, so a reordering server would show it
                    tokio::time::sleep(Duration::from_millis(data.len() as u64)).await;
                    Ok(KernelResponse::Written(data.len()))
                }
                KernelRequest::Dial { port } => Err(KernelError::Unavailable(port)),
                other => Err(KernelError::not_implemented(other.method())),
            }
        }
    }

    fn start() -> (Arc<RpcClient>, Arc<MockKernel>, JoinHandle<()>) {
        let (client_port, server_port) = tunnel();
        let kernel = Arc::new(MockKernel::default());
        let server = RpcServer::spawn(server_port, kernel.clone());
        (Arc::new(RpcClient::new(client_port)), kernel, server)
    }

    #[tokio::test]
    async fn test_results_and_errors() {
        let (client, _kernel, _server) = start();

        let reply = client.invoke(KernelRequest::NextHandle).await.unwrap();
        assert!(matches!(reply, KernelResponse::Handle(h) if h == Handle::from_raw(10_000)));

        let err = client
            .invoke(KernelRequest::Dial {
                port: VirtualPort::new(9),
            })
            .await
            .unwrap_err();
        assert_eq!(err, KernelError::Unavailable(VirtualPort::new(9)));

        let err = client.invoke(KernelRequest::Exit).await.unwrap_err();
        assert_eq!(err, KernelError::not_implemented("Exit"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_served_in_arrival_order() {
        let (client, kernel, _server) = start();

        let mut calls = Vec::new();
        for size in [30usize, 1, 20, 2] {
            let client = client.clone();
            calls.push(tokio::spawn(async move {
                let reply = client
                    .invoke(KernelRequest::Write {
                        handle: Handle::from_raw(10_000),
                        data: vec![0; size],
                    })
                    .await
                    .unwrap();
                (size, reply)
            }));
            tokio::task::yield_now().await;
        }

        for call in calls {
            let (size, reply) = call.await.unwrap();
            assert!(matches!(reply, KernelResponse::Written(n) if n == size));
        }
        assert_eq!(
            *kernel.log.lock().unwrap(),
            vec!["Write 30", "Write 1", "Write 20", "Write 2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_does_not_leak_reply() {
        let (client, _kernel, _server) = start();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            client.invoke(KernelRequest::Write {
                handle: Handle::from_raw(10_000),
                data: vec![0; 50],
            }),
        )
        .await;
        assert!(abandoned.is_err());

        let reply = client.invoke(KernelRequest::NextHandle).await.unwrap();
        assert!(matches!(reply, KernelResponse::Handle(_)));
    }

    #[tokio::test]
    async fn test_server_stops_when_client_dropped() {
        let (client, _kernel, server) = start();
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_after_server_gone() {
        let (client_port, server_port) = tunnel();
        drop(server_port);
        let client = RpcClient::new(client_port);
        assert_eq!(
            client.invoke(KernelRequest::NextHandle).await.unwrap_err(),
            KernelError::Closed
        );
    }
}
