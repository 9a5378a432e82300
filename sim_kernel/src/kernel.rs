//! The resource-owning kernel

use crate::host::{ArtifactResolver, ExecutionHost, LaunchSpec, StaticResolver, TaskHost};
use crate::pipe::Pipe;
use crate::process::{ProcessSyscalls, Worker};
use crate::resource_table::{Resource, ResourceKind, ResourceTable, StreamCloser};
use crate::syscalls::Syscalls;
use console_log::{ConsoleSink, ConsoleStream};
use core_types::{Handle, HandleAllocator, VirtualPort};
use ipc::{ListenerFrame, MessagePort, StreamPort};
use kernel_api::{
    ExitStatus, FileSystem, KernelConfig, KernelError, KernelResult, OpenFlags, ProcAttr,
    StreamLimits,
};
use remote_ipc::RpcServer;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use virtual_net::{AckedConn, ConnAddr, Listener};

struct Inner {
    config: KernelConfig,
    limits: StreamLimits,
    handles: HandleAllocator,
    table: Mutex<ResourceTable>,
    console: ConsoleSink,
    resolver: Arc<dyn ArtifactResolver>,
    host: Arc<dyn ExecutionHost>,
    fs: Option<Arc<dyn FileSystem>>,
}

/// The single authority over handles and the resources behind them
///
/// Cheap to clone; every clone is the same kernel. Table mutations happen
/// under one mutex that is never held across an await, so a blocked accept,
/// wait, or write never stalls unrelated operations.
///
/// Must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`Kernel`]
#[derive(Clone)]
pub struct WeakKernel {
    inner: Weak<Inner>,
}

impl WeakKernel {
    pub fn upgrade(&self) -> Option<Kernel> {
        self.inner.upgrade().map(|inner| Kernel { inner })
    }
}

/// Builder for [`Kernel`]
pub struct KernelBuilder {
    config: KernelConfig,
    resolver: Arc<dyn ArtifactResolver>,
    host: Arc<dyn ExecutionHost>,
    fs: Option<Arc<dyn FileSystem>>,
}

impl KernelBuilder {
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ArtifactResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn host(mut self, host: Arc<dyn ExecutionHost>) -> Self {
        self.host = host;
        self
    }

    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn build(self) -> Kernel {
        let limits = self.config.stream_limits();
        Kernel {
            inner: Arc::new(Inner {
                handles: HandleAllocator::new(self.config.first_handle),
                console: ConsoleSink::new(self.config.console_history),
                table: Mutex::new(ResourceTable::default()),
                limits,
                config: self.config,
                resolver: self.resolver,
                host: self.host,
                fs: self.fs,
            }),
        }
    }
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder {
            config: KernelConfig::default(),
            resolver: Arc::new(StaticResolver::new()),
            host: Arc::new(TaskHost::new()),
            fs: None,
        }
    }

    /// A kernel with no programs and no file backend
    pub fn new(config: KernelConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn downgrade(&self) -> WeakKernel {
        WeakKernel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    pub fn console(&self) -> &ConsoleSink {
        &self.inner.console
    }

    /// Kind of resource behind `handle`, if it is live
    pub fn resource_kind(&self, handle: Handle) -> Option<ResourceKind> {
        self.table().kind(handle)
    }

    /// Number of live handles
    pub fn resource_count(&self) -> usize {
        self.table().len()
    }

    /// Handle of the listener bound to `port`
    pub fn listener_on(&self, port: VirtualPort) -> Option<Handle> {
        self.table().listener_on(port).map(|(handle, _)| handle)
    }

    pub fn next_handle(&self) -> Handle {
        self.inner.handles.next()
    }

    fn table(&self) -> MutexGuard<'_, ResourceTable> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the table entry without tearing anything down
    ///
    /// Used by objects that already tore themselves down.
    fn release_on_close(&self, handle: Handle) -> impl FnOnce() + Send + 'static {
        let kernel = self.downgrade();
        move || {
            if let Some(kernel) = kernel.upgrade() {
                kernel.table().remove(handle);
            }
        }
    }

    /// Connects to the listener on `port`
    pub fn dial(&self, port: VirtualPort) -> KernelResult<AckedConn> {
        let (handle, endpoint) = self.dial_endpoint(port)?;
        Ok(AckedConn::new(
            ConnAddr::Handle(handle),
            Some(ConnAddr::Port(port)),
            endpoint,
            self.inner.limits,
        )
        .with_on_close(self.release_on_close(handle)))
    }

    /// Registers a connection and queues its accepting end on the listener
    ///
    /// Returns the dialing end for the caller to wrap.
    pub(crate) fn dial_endpoint(&self, port: VirtualPort) -> KernelResult<(Handle, StreamPort)> {
        let mut table = self.table();
        let frames = match table.listener_on(port) {
            Some((_, frames)) => frames.clone(),
            None => return Err(KernelError::Unavailable(port)),
        };

        let handle = self.inner.handles.next();
        let (dialer, acceptor) = StreamPort::pair();
        let closer = StreamCloser {
            to_dialer: acceptor.sender(),
            to_acceptor: dialer.sender(),
        };

        frames
            .post(ListenerFrame::Connection {
                peer: Some(handle),
                endpoint: acceptor,
            })
            .map_err(|_| KernelError::Unavailable(port))?;
        table.insert(handle, Resource::Connection(closer));
        drop(table);

        tracing::debug!(%handle, %port, "dialed");
        Ok((handle, dialer))
    }

    /// Binds `port` and returns its listener
    pub fn listen(&self, port: VirtualPort) -> KernelResult<Listener> {
        let (handle, port, endpoint) = self.listen_endpoint(port)?;
        Ok(Listener::new(handle, port, endpoint, self.inner.limits)
            .with_on_close(self.release_on_close(handle)))
    }

    pub(crate) fn listen_endpoint(
        &self,
        port: VirtualPort,
    ) -> KernelResult<(Handle, VirtualPort, MessagePort<ListenerFrame>)> {
        let mut table = self.table();
        let port = if port.is_any() {
            table
                .free_port(self.inner.config.ephemeral_port_start)
                .ok_or(KernelError::Unavailable(port))?
        } else {
            port
        };

        let handle = self.inner.handles.next();
        let (listener_end, kernel_end) = MessagePort::pair();
        table.bind(handle, port, kernel_end.sender())?;
        drop(table);

        tracing::debug!(%handle, %port, "listening");
        Ok((handle, port, listener_end))
    }

    /// Creates a pipe, returning `(reader, writer)`
    pub fn pipe(&self) -> KernelResult<(Handle, Handle)> {
        let pipe = Arc::new(Pipe::new(self.inner.config.pipe_capacity));
        let reader = self.inner.handles.next();
        let writer = self.inner.handles.next();

        let mut table = self.table();
        table.insert(reader, Resource::PipeReader(pipe.clone()));
        table.insert(writer, Resource::PipeWriter(pipe));
        Ok((reader, writer))
    }

    /// Opens `path` on the file backend and wraps it in a handle
    pub fn open(&self, path: &str, flags: OpenFlags, perm: u32) -> KernelResult<Handle> {
        let fs = self.filesystem()?;
        let fd = fs.open(path, flags, perm)?;
        let handle = self.inner.handles.next();
        self.table().insert(handle, Resource::File(fd));
        tracing::debug!(%handle, path, "file opened");
        Ok(handle)
    }

    pub fn fcntl(&self, handle: Handle, cmd: i32, arg: u64) -> KernelResult<u64> {
        let fd = match self.table().get(handle) {
            Some(Resource::File(fd)) => *fd,
            Some(other) => {
                return Err(KernelError::not_implemented(format!(
                    "fcntl on {}",
                    other.kind()
                )))
            }
            None => return Err(KernelError::invalid(format!("bad handle {}", handle.as_raw()))),
        };
        self.filesystem()?.fcntl(fd, cmd, arg)
    }

    fn filesystem(&self) -> KernelResult<&Arc<dyn FileSystem>> {
        self.inner
            .fs
            .as_ref()
            .ok_or_else(|| KernelError::not_implemented("no filesystem"))
    }

    pub async fn read(&self, handle: Handle, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Err(KernelError::invalid("empty read buffer"));
        }
        if handle.is_reserved() {
            return Err(KernelError::not_implemented(format!(
                "read from {}",
                handle.as_raw()
            )));
        }

        let target = match self.table().get(handle) {
            Some(Resource::PipeReader(pipe)) => IoTarget::Pipe(pipe.clone()),
            Some(Resource::File(fd)) => IoTarget::File(*fd),
            Some(other) => return Err(KernelError::not_implemented(format!("read on {}", other.kind()))),
            None => return Err(KernelError::invalid(format!("bad handle {}", handle.as_raw()))),
        };

        match target {
            IoTarget::Pipe(pipe) => pipe.read(buf).await,
            IoTarget::File(fd) => self.filesystem()?.read(fd, buf),
        }
    }

    pub async fn write(&self, handle: Handle, data: &[u8]) -> KernelResult<usize> {
        self.write_from(None, handle, data).await
    }

    /// Writes on behalf of process `source`; console lines are attributed to it
    pub(crate) async fn write_from(
        &self,
        source: Option<Handle>,
        handle: Handle,
        data: &[u8],
    ) -> KernelResult<usize> {
        if let Some(stream) = ConsoleStream::from_handle(handle) {
            return Ok(self.inner.console.write(source, stream, data));
        }
        if handle == Handle::STDIN {
            return Err(KernelError::not_implemented("write to stdin"));
        }

        let target = match self.table().get(handle) {
            Some(Resource::PipeWriter(pipe)) => IoTarget::Pipe(pipe.clone()),
            Some(Resource::File(fd)) => IoTarget::File(*fd),
            Some(other) => return Err(KernelError::not_implemented(format!("write on {}", other.kind()))),
            None => return Err(KernelError::invalid(format!("bad handle {}", handle.as_raw()))),
        };

        match target {
            IoTarget::Pipe(pipe) => pipe.write(data).await,
            IoTarget::File(fd) => self.filesystem()?.write(fd, data),
        }
    }

    /// Tears down the resource behind `handle`
    ///
    /// Unknown, already closed, and console handles are ignored.
    pub fn close(&self, handle: Handle) -> KernelResult<()> {
        if handle.is_reserved() {
            return Ok(());
        }

        if self.resource_kind(handle) == Some(ResourceKind::Worker) {
            self.reap(handle, ExitStatus::Killed);
            return Ok(());
        }

        let removed = self.table().remove(handle);

        match removed {
            None => {
                tracing::trace!(%handle, "close of unknown handle ignored");
                Ok(())
            }
            Some(Resource::Listener { frames, .. }) => {
                let _ = frames.post(ListenerFrame::Close);
                Ok(())
            }
            Some(Resource::Connection(closer)) => {
                closer.close();
                Ok(())
            }
            Some(Resource::Worker(worker)) => {
                worker.finish(ExitStatus::Killed);
                Ok(())
            }
            Some(Resource::PipeReader(pipe)) => {
                pipe.close_reader();
                Ok(())
            }
            Some(Resource::PipeWriter(pipe)) => {
                pipe.close_writer();
                Ok(())
            }
            Some(Resource::File(fd)) => self.filesystem()?.close(fd),
        }
    }

    /// Resolves `argv0`, starts it in a nested context, and returns its pid
    ///
    /// The new process reaches this same kernel through its tunnel, so it
    /// shares the caller's ports, pipes, and console.
    pub async fn start_process(
        &self,
        argv0: &str,
        args: Vec<String>,
        attr: ProcAttr,
    ) -> KernelResult<Handle> {
        let location = self
            .inner
            .resolver
            .resolve(argv0)
            .await
            .map_err(KernelError::SpawnFailed)?;

        let pid = self.inner.handles.next();
        let (client_port, server_port) = remote_ipc::tunnel();
        let worker = Arc::new(Worker::new(pid, argv0));
        self.table().insert(pid, Resource::Worker(worker.clone()));

        let server = RpcServer::spawn(
            server_port,
            ProcessSyscalls {
                kernel: self.downgrade(),
                pid,
            },
        );
        worker.set_server(server.abort_handle());

        let supervisor = self.downgrade();
        tokio::spawn(async move {
            let _ = server.await;
            if let Some(kernel) = supervisor.upgrade() {
                kernel.reap(pid, ExitStatus::Disconnected);
            }
        });

        let spec = LaunchSpec {
            pid,
            location: location.clone(),
            argv0: argv0.to_string(),
            args,
            attr,
            tunnel: client_port,
            limits: self.inner.limits,
        };
        match self.inner.host.launch(spec).await {
            Ok(instance) => {
                if let Some(late) = worker.attach(instance) {
                    late.terminate();
                }
            }
            Err(message) => {
                self.reap(pid, ExitStatus::Killed);
                return Err(KernelError::SpawnFailed(message));
            }
        }

        tracing::info!(%pid, argv0, location = %location, "process started");
        Ok(pid)
    }

    /// Removes process `pid` from the table and wakes its waiters
    ///
    /// A process that did not exit on its own cannot release what it
    /// created, so its handles are torn down here. Returns false if the
    /// process was already gone.
    pub(crate) fn reap(&self, pid: Handle, status: ExitStatus) -> bool {
        let (worker, owned) = {
            let mut table = self.table();
            let worker = table.remove_worker(pid, status);
            (worker, table.take_owned(pid))
        };
        let Some(worker) = worker else {
            return false;
        };

        worker.finish(status);
        if status != ExitStatus::Exited {
            for handle in &owned {
                if let Err(err) = self.close(*handle) {
                    tracing::warn!(%pid, %handle, error = %err, "failed to release process handle");
                }
            }
        }
        tracing::info!(%pid, argv0 = worker.argv0(), %status, released = owned.len(), "process ended");
        true
    }

    /// Attributes `handles` to process `pid`
    ///
    /// If `pid` already ended they are released at once.
    pub(crate) fn claim(&self, pid: Handle, handles: &[Handle]) -> KernelResult<()> {
        if self.table().claim(pid, handles) {
            return Ok(());
        }
        for handle in handles {
            self.close(*handle)?;
        }
        Err(KernelError::Closed)
    }

    /// Waits for process `pid` to end
    ///
    /// Returns at once for a process that already ended.
    pub async fn wait(&self, pid: Handle) -> KernelResult<ExitStatus> {
        let worker = {
            let table = self.table();
            if let Some(status) = table.exit_status(pid) {
                return Ok(status);
            }
            match table.get(pid) {
                Some(Resource::Worker(worker)) => worker.clone(),
                Some(other) => {
                    return Err(KernelError::invalid(format!(
                        "{} is a {}, not a process",
                        pid.as_raw(),
                        other.kind()
                    )))
                }
                None => return Err(KernelError::NotFound(format!("process {}", pid.as_raw()))),
            }
        };
        Ok(worker.wait().await)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("resources", &self.resource_count())
            .field("next_handle", &self.inner.handles.peek())
            .finish()
    }
}

enum IoTarget {
    Pipe(Arc<Pipe>),
    File(u64),
}

impl Syscalls for Kernel {
    async fn dial(&self, port: VirtualPort) -> KernelResult<AckedConn> {
        Kernel::dial(self, port)
    }

    async fn listen(&self, port: VirtualPort) -> KernelResult<Listener> {
        Kernel::listen(self, port)
    }

    async fn pipe(&self) -> KernelResult<(Handle, Handle)> {
        Kernel::pipe(self)
    }

    async fn read(&self, handle: Handle, buf: &mut [u8]) -> KernelResult<usize> {
        Kernel::read(self, handle, buf).await
    }

    async fn write(&self, handle: Handle, data: &[u8]) -> KernelResult<usize> {
        Kernel::write(self, handle, data).await
    }

    async fn close(&self, handle: Handle) -> KernelResult<()> {
        Kernel::close(self, handle)
    }

    async fn start_process(
        &self,
        argv0: &str,
        args: Vec<String>,
        attr: ProcAttr,
    ) -> KernelResult<Handle> {
        Kernel::start_process(self, argv0, args, attr).await
    }

    async fn wait(&self, pid: Handle) -> KernelResult<ExitStatus> {
        Kernel::wait(self, pid).await
    }

    async fn next_handle(&self) -> KernelResult<Handle> {
        Ok(Kernel::next_handle(self))
    }
}
