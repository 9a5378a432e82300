//! Resilience Test Utilities
//!
//! This crate provides shared utilities for end-to-end tests of the kernel.
//!
//! ## Test Philosophy
//!
//! - **Byte-exact streams**: What one side writes is what the other side reads
//! - **Explicit failures**: Every fault surfaces as an error, never a panic or a hang
//! - **One namespace**: Nested processes see the same ports and handles as their owner
//! - **Idempotent teardown**: Closing twice is always safe

use core_types::VirtualPort;
use kernel_api::{FileSystem, KernelConfig, KernelResult};
use sim_kernel::{GuestContext, Kernel, StaticResolver, TaskHost};
use std::future::Future;
use std::sync::Arc;
use virtual_net::AckedConn;

/// Builder for a kernel preloaded with guest programs
///
/// Each program registered under `name` resolves to `mem://name`.
pub struct TestSystem {
    config: KernelConfig,
    host: Arc<TaskHost>,
    resolver: StaticResolver,
    fs: Option<Arc<dyn FileSystem>>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            host: Arc::new(TaskHost::new()),
            resolver: StaticResolver::new(),
            fs: None,
        }
    }

    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn program<F, Fut>(mut self, name: &str, program: F) -> Self
    where
        F: Fn(GuestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = KernelResult<()>> + Send + 'static,
    {
        let location = format!("mem://{name}");
        self.host.register(location.clone(), program);
        self.resolver = self.resolver.with_program(name, location);
        self
    }

    pub fn boot(self) -> Kernel {
        let builder = Kernel::builder()
            .config(self.config)
            .resolver(Arc::new(self.resolver))
            .host(self.host);
        match self.fs {
            Some(fs) => builder.filesystem(fs).build(),
            None => builder.build(),
        }
    }
}

impl Default for TestSystem {
    fn default() -> Self {
        Self::new()
    }
}

pub fn port(n: u16) -> VirtualPort {
    VirtualPort::new(n)
}

/// Reads until the peer closes
pub async fn read_to_end(conn: &AckedConn) -> KernelResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Reads exactly `len` bytes
pub async fn read_exact(conn: &AckedConn, len: usize) -> KernelResult<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = conn.read(&mut out[filled..]).await?;
        if n == 0 {
            return Err(kernel_api::KernelError::Closed);
        }
        filled += n;
    }
    Ok(out)
}

/// Polls until a listener is bound on `port`
pub async fn wait_for_listener(kernel: &Kernel, port: VirtualPort) {
    while kernel.listener_on(port).is_none() {
        tokio::task::yield_now().await;
    }
}
