//! The syscall surface guest code programs against
//!
//! Implemented by [`crate::Kernel`] for code running beside the resource
//! table, and by [`crate::GuestKernel`] for code inside a nested context,
//! where every call crosses the tunnel. Programs written against
//! [`Syscalls`] run unchanged in either place.

use core_types::{Handle, VirtualPort};
use kernel_api::{ExitStatus, KernelResult, ProcAttr};
use std::future::Future;
use virtual_net::{parse_tcp_address, AckedConn, Listener};

pub trait Syscalls: Send + Sync {
    /// Connects to the listener bound to `port`
    ///
    /// Returns as soon as the connection is queued; the listener may accept
    /// it later.
    fn dial(&self, port: VirtualPort) -> impl Future<Output = KernelResult<AckedConn>> + Send;

    /// Binds `port`; port 0 picks a free ephemeral port
    fn listen(&self, port: VirtualPort) -> impl Future<Output = KernelResult<Listener>> + Send;

    /// Creates a pipe, returning `(reader, writer)`
    fn pipe(&self) -> impl Future<Output = KernelResult<(Handle, Handle)>> + Send;

    fn read(
        &self,
        handle: Handle,
        buf: &mut [u8],
    ) -> impl Future<Output = KernelResult<usize>> + Send;

    fn write(&self, handle: Handle, data: &[u8]) -> impl Future<Output = KernelResult<usize>> + Send;

    /// Tears down whatever `handle` refers to; unknown handles are ignored
    fn close(&self, handle: Handle) -> impl Future<Output = KernelResult<()>> + Send;

    fn start_process(
        &self,
        argv0: &str,
        args: Vec<String>,
        attr: ProcAttr,
    ) -> impl Future<Output = KernelResult<Handle>> + Send;

    /// Waits for process `pid` to end
    fn wait(&self, pid: Handle) -> impl Future<Output = KernelResult<ExitStatus>> + Send;

    fn next_handle(&self) -> impl Future<Output = KernelResult<Handle>> + Send;
}

/// Dials a `host:port` address on a `tcp`/`tcp4` network
pub async fn dial_address<S: Syscalls>(
    sys: &S,
    network: &str,
    address: &str,
) -> KernelResult<AckedConn> {
    let port = parse_tcp_address(network, address)?;
    sys.dial(port).await
}

/// Listens on a `host:port` address on a `tcp`/`tcp4` network
pub async fn listen_address<S: Syscalls>(
    sys: &S,
    network: &str,
    address: &str,
) -> KernelResult<Listener> {
    let port = parse_tcp_address(network, address)?;
    sys.listen(port).await
}

/// Writes all of `data`, looping over short writes
pub async fn write_all<S: Syscalls>(sys: &S, handle: Handle, mut data: &[u8]) -> KernelResult<()> {
    while !data.is_empty() {
        let n = sys.write(handle, data).await?;
        if n == 0 {
            return Err(kernel_api::KernelError::Closed);
        }
        data = &data[n..];
    }
    Ok(())
}
