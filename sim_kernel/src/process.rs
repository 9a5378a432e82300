//! Process supervision
//!
//! A [`Worker`] is the table entry behind a pid. It carries the wait signal,
//! the running instance, and the tunnel server that answers the process's
//! syscalls. [`ProcessSyscalls`] is that server's handler: it forwards each
//! request into the same kernel that owns the parent's resources.

use crate::host::WorkerInstance;
use crate::kernel::WeakKernel;
use core_types::Handle;
use kernel_api::{ExitStatus, KernelError, KernelResult};
use remote_ipc::{KernelRequest, KernelResponse, RpcHandler};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Largest single read served over a tunnel
const MAX_TUNNEL_READ: usize = 64 * 1024;

pub(crate) struct Worker {
    pid: Handle,
    argv0: String,
    status: watch::Sender<Option<ExitStatus>>,
    instance: Mutex<Option<Box<dyn WorkerInstance>>>,
    server: Mutex<Option<AbortHandle>>,
}

impl Worker {
    pub(crate) fn new(pid: Handle, argv0: impl Into<String>) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            pid,
            argv0: argv0.into(),
            status,
            instance: Mutex::new(None),
            server: Mutex::new(None),
        }
    }

    pub(crate) fn argv0(&self) -> &str {
        &self.argv0
    }

    pub(crate) fn set_server(&self, server: AbortHandle) {
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(server);
    }

    /// Stores the running instance
    ///
    /// Hands the instance back if the worker already finished, so the caller
    /// can stop it.
    pub(crate) fn attach(
        &self,
        instance: Box<dyn WorkerInstance>,
    ) -> Option<Box<dyn WorkerInstance>> {
        let mut slot = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        if self.status.borrow().is_some() {
            return Some(instance);
        }
        *slot = Some(instance);
        None
    }

    /// Publishes the exit status and stops the instance
    ///
    /// A killed worker also loses its tunnel server; a worker that exited on
    /// its own keeps it long enough to answer the `Exit` call.
    pub(crate) fn finish(&self, status: ExitStatus) {
        self.status.send_replace(Some(status));

        let instance = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(instance) = instance {
            instance.terminate();
        }

        if status == ExitStatus::Killed {
            let server = self
                .server
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(server) = server {
                server.abort();
            }
        }
    }

    pub(crate) async fn wait(&self) -> ExitStatus {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(Option::is_some).await {
            Ok(status) => *status,
            Err(_) => None,
        };
        status.unwrap_or(ExitStatus::Disconnected)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.pid)
            .field("argv0", &self.argv0)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// Handler behind a process's tunnel
pub(crate) struct ProcessSyscalls {
    pub(crate) kernel: WeakKernel,
    pub(crate) pid: Handle,
}

impl RpcHandler for ProcessSyscalls {
    async fn handle(&self, request: KernelRequest) -> KernelResult<KernelResponse> {
        let kernel = self.kernel.upgrade().ok_or(KernelError::Closed)?;

        match request {
            KernelRequest::Dial { port } => {
                let (handle, endpoint) = kernel.dial_endpoint(port)?;
                kernel.claim(self.pid, &[handle])?;
                Ok(KernelResponse::Dialed {
                    handle,
                    port,
                    endpoint,
                })
            }
            KernelRequest::Listen { port } => {
                let (handle, port, endpoint) = kernel.listen_endpoint(port)?;
                kernel.claim(self.pid, &[handle])?;
                Ok(KernelResponse::Listening {
                    handle,
                    port,
                    endpoint,
                })
            }
            KernelRequest::Close { handle } => {
                kernel.close(handle)?;
                Ok(KernelResponse::Closed)
            }
            KernelRequest::Read { handle, size } => {
                let mut buf = vec![0; size.min(MAX_TUNNEL_READ)];
                let n = kernel.read(handle, &mut buf).await?;
                buf.truncate(n);
                Ok(KernelResponse::Data(buf))
            }
            KernelRequest::Write { handle, data } => {
                let n = kernel.write_from(Some(self.pid), handle, &data).await?;
                Ok(KernelResponse::Written(n))
            }
            KernelRequest::StartProcess { argv0, args, attr } => {
                let pid = kernel.start_process(&argv0, args, attr).await?;
                Ok(KernelResponse::Started { pid })
            }
            KernelRequest::NextHandle => Ok(KernelResponse::Handle(kernel.next_handle())),
            KernelRequest::Exit => {
                kernel.reap(self.pid, ExitStatus::Exited);
                Ok(KernelResponse::Exited)
            }
            KernelRequest::Pipe => {
                let (reader, writer) = kernel.pipe()?;
                kernel.claim(self.pid, &[reader, writer])?;
                Ok(KernelResponse::Pipe { reader, writer })
            }
            KernelRequest::Wait { pid } => Ok(KernelResponse::Waited(kernel.wait(pid).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingInstance(Arc<AtomicUsize>);

    impl WorkerInstance for CountingInstance {
        fn terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_finish_terminates_attached_instance() {
        let stops = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new(Handle::from_raw(10_000), "ping");
        assert!(worker
            .attach(Box::new(CountingInstance(stops.clone())))
            .is_none());

        worker.finish(ExitStatus::Exited);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(worker.wait().await, ExitStatus::Exited);
    }

    #[tokio::test]
    async fn test_attach_after_finish_is_refused() {
        let stops = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new(Handle::from_raw(10_000), "ping");
        worker.finish(ExitStatus::Killed);

        let refused = worker.attach(Box::new(CountingInstance(stops.clone())));
        assert!(refused.is_some());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_finish() {
        let worker = Arc::new(Worker::new(Handle::from_raw(10_000), "ping"));
        let waiter = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        worker.finish(ExitStatus::Disconnected);
        assert_eq!(waiter.await.unwrap(), ExitStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_killed_aborts_server() {
        let worker = Worker::new(Handle::from_raw(10_000), "ping");
        let server = tokio::spawn(std::future::pending::<()>());
        worker.set_server(server.abort_handle());

        worker.finish(ExitStatus::Killed);
        assert!(server.await.unwrap_err().is_cancelled());
    }
}
