//! Kernel surface inside a nested execution context
//!
//! A guest has no resource table of its own. [`GuestKernel`] forwards every
//! call through the tunnel to the owner, and builds local stream objects
//! around the channel endpoints the owner hands back.

use crate::host::{GuestProgram, LaunchSpec};
use crate::syscalls::{write_all, Syscalls};
use core_types::{Handle, VirtualPort};
use kernel_api::{ExitStatus, KernelError, KernelResult, ProcAttr, StreamLimits};
use remote_ipc::{ClientPort, KernelRequest, KernelResponse, RpcClient};
use std::sync::Arc;
use virtual_net::{AckedConn, ConnAddr, Listener};

/// Syscalls forwarded to the owning kernel
pub struct GuestKernel {
    client: Arc<RpcClient>,
    limits: StreamLimits,
}

impl GuestKernel {
    pub fn new(tunnel: ClientPort, limits: StreamLimits) -> Self {
        Self {
            client: Arc::new(RpcClient::new(tunnel)),
            limits,
        }
    }

    /// Tells the owner this process is done
    pub async fn exit(&self) -> KernelResult<()> {
        match self.client.invoke(KernelRequest::Exit).await? {
            KernelResponse::Exited => Ok(()),
            other => Err(other.unexpected("Exit")),
        }
    }

    /// Hook that releases `handle` on the owner when a local object closes
    fn close_remotely(&self, handle: Handle) -> impl FnOnce() + Send + 'static {
        let client = self.client.clone();
        move || {
            // closes can run from Drop, possibly after the runtime is gone
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };
            runtime.spawn(async move {
                if let Err(err) = client.invoke(KernelRequest::Close { handle }).await {
                    tracing::debug!(%handle, error = %err, "remote close failed");
                }
            });
        }
    }
}

impl Syscalls for GuestKernel {
    async fn dial(&self, port: VirtualPort) -> KernelResult<AckedConn> {
        match self.client.invoke(KernelRequest::Dial { port }).await? {
            KernelResponse::Dialed {
                handle,
                port,
                endpoint,
            } => Ok(AckedConn::new(
                ConnAddr::Handle(handle),
                Some(ConnAddr::Port(port)),
                endpoint,
                self.limits,
            )
            .with_on_close(self.close_remotely(handle))),
            other => Err(other.unexpected("Dial")),
        }
    }

    async fn listen(&self, port: VirtualPort) -> KernelResult<Listener> {
        match self.client.invoke(KernelRequest::Listen { port }).await? {
            KernelResponse::Listening {
                handle,
                port,
                endpoint,
            } => Ok(Listener::new(handle, port, endpoint, self.limits)
                .with_on_close(self.close_remotely(handle))),
            other => Err(other.unexpected("Listen")),
        }
    }

    async fn pipe(&self) -> KernelResult<(Handle, Handle)> {
        match self.client.invoke(KernelRequest::Pipe).await? {
            KernelResponse::Pipe { reader, writer } => Ok((reader, writer)),
            other => Err(other.unexpected("Pipe")),
        }
    }

    async fn read(&self, handle: Handle, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Err(KernelError::invalid("empty read buffer"));
        }
        let request = KernelRequest::Read {
            handle,
            size: buf.len(),
        };
        match self.client.invoke(request).await? {
            KernelResponse::Data(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            other => Err(other.unexpected("Read")),
        }
    }

    async fn write(&self, handle: Handle, data: &[u8]) -> KernelResult<usize> {
        let request = KernelRequest::Write {
            handle,
            data: data.to_vec(),
        };
        match self.client.invoke(request).await? {
            KernelResponse::Written(n) => Ok(n),
            other => Err(other.unexpected("Write")),
        }
    }

    async fn close(&self, handle: Handle) -> KernelResult<()> {
        match self.client.invoke(KernelRequest::Close { handle }).await? {
            KernelResponse::Closed => Ok(()),
            other => Err(other.unexpected("Close")),
        }
    }

    async fn start_process(
        &self,
        argv0: &str,
        args: Vec<String>,
        attr: ProcAttr,
    ) -> KernelResult<Handle> {
        let request = KernelRequest::StartProcess {
            argv0: argv0.to_string(),
            args,
            attr,
        };
        match self.client.invoke(request).await? {
            KernelResponse::Started { pid } => Ok(pid),
            other => Err(other.unexpected("StartProcess")),
        }
    }

    async fn wait(&self, pid: Handle) -> KernelResult<ExitStatus> {
        match self.client.invoke(KernelRequest::Wait { pid }).await? {
            KernelResponse::Waited(status) => Ok(status),
            other => Err(other.unexpected("Wait")),
        }
    }

    async fn next_handle(&self) -> KernelResult<Handle> {
        match self.client.invoke(KernelRequest::NextHandle).await? {
            KernelResponse::Handle(handle) => Ok(handle),
            other => Err(other.unexpected("NextHandle")),
        }
    }
}

/// What a guest program starts with
pub struct GuestContext {
    pub kernel: Arc<GuestKernel>,
    pub pid: Handle,
    pub argv0: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub dir: Option<String>,
    pub stdin: Handle,
    pub stdout: Handle,
    pub stderr: Handle,
}

impl GuestContext {
    /// Writes a line to this process's stdout
    pub async fn println(&self, line: &str) -> KernelResult<()> {
        write_all(&*self.kernel, self.stdout, format!("{line}\n").as_bytes()).await
    }

    /// Writes a line to this process's stderr
    pub async fn eprintln(&self, line: &str) -> KernelResult<()> {
        write_all(&*self.kernel, self.stderr, format!("{line}\n").as_bytes()).await
    }

    /// Looks up `key` in the inherited environment
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            (name == key).then_some(value)
        })
    }
}

/// Runs `program` to completion, then reports exit to the owner
///
/// An error returned by the program is written to its stderr first.
pub async fn run_guest(spec: LaunchSpec, program: GuestProgram) {
    let LaunchSpec {
        pid,
        argv0,
        args,
        attr,
        tunnel,
        limits,
        ..
    } = spec;

    let kernel = Arc::new(GuestKernel::new(tunnel, limits));
    let ctx = GuestContext {
        kernel: kernel.clone(),
        pid,
        argv0: argv0.clone(),
        stdin: attr.stdio(0),
        stdout: attr.stdio(1),
        stderr: attr.stdio(2),
        args,
        env: attr.env,
        dir: attr.dir,
    };
    let stderr = ctx.stderr;

    if let Err(err) = program(ctx).await {
        tracing::debug!(%pid, error = %err, "guest program failed");
        let line = format!("{argv0}: {err}\n");
        let _ = write_all(&*kernel, stderr, line.as_bytes()).await;
    }

    match kernel.exit().await {
        Ok(()) | Err(KernelError::Closed) => {}
        Err(err) => tracing::warn!(%pid, error = %err, "exit was not acknowledged"),
    }
}
