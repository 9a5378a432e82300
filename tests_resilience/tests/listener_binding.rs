//! Listener Binding Tests
//!
//! Validates port ownership rules:
//! - One listener per port, reusable after close
//! - Dial to an unbound port fails fast
//! - Backlog overflow rejects instead of dropping silently

use kernel_api::{Errno, KernelConfig, KernelError};
use sim_kernel::{dial_address, listen_address, Kernel, ResourceKind};
use tests_resilience::{port, read_to_end, TestSystem};

#[tokio::test]
async fn test_second_listen_on_port_fails_until_first_closes() {
    let kernel = TestSystem::new().boot();

    let first = kernel.listen(port(8080)).unwrap();
    let err = kernel.listen(port(8080)).unwrap_err();
    assert_eq!(err, KernelError::AlreadyBound(port(8080)));
    assert_eq!(err.errno(), Errno::EADDRINUSE);

    first.close().unwrap();
    let second = kernel.listen(port(8080)).unwrap();
    assert_eq!(kernel.listener_on(port(8080)), Some(second.handle()));
}

#[tokio::test]
async fn test_dropping_listener_frees_port() {
    let kernel = TestSystem::new().boot();
    {
        let _listener = kernel.listen(port(8080)).unwrap();
    }
    assert!(kernel.listen(port(8080)).is_ok());
}

#[tokio::test]
async fn test_dial_without_listener_is_unavailable() {
    let kernel = TestSystem::new().boot();
    let err = kernel.dial(port(9999)).unwrap_err();
    assert_eq!(err, KernelError::Unavailable(port(9999)));
    assert_eq!(err.errno(), Errno::ECONNREFUSED);
}

#[tokio::test]
async fn test_dial_returns_before_accept() {
    let kernel = TestSystem::new().boot();
    let listener = kernel.listen(port(8080)).unwrap();

    let client = kernel.dial(port(8080)).unwrap();
    client.write(b"queued").await.unwrap();
    client.close().unwrap();

    let server = listener.accept().await.unwrap();
    assert_eq!(read_to_end(&server).await.unwrap(), b"queued");
}

#[tokio::test]
async fn test_backlog_overflow_rejects_connection() {
    let config = KernelConfig::default().with_listener_backlog(2);
    let kernel = TestSystem::new().with_config(config).boot();
    let listener = kernel.listen(port(8080)).unwrap();

    let queued: Vec<_> = (0..2).map(|_| kernel.dial(port(8080)).unwrap()).collect();
    let rejected = kernel.dial(port(8080)).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(rejected.read(&mut buf).await, Ok(0));

    for client in &queued {
        let server = listener.accept().await.unwrap();
        client.write(b"in").await.unwrap();
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"in");
    }
}

#[tokio::test]
async fn test_closing_listener_wakes_accept_and_rejects_dials() {
    let kernel = TestSystem::new().boot();
    let listener = std::sync::Arc::new(kernel.listen(port(8080)).unwrap());

    let pending = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.accept().await.map(|_| ()) })
    };
    tokio::task::yield_now().await;

    kernel.close(listener.handle()).unwrap();
    assert_eq!(pending.await.unwrap(), Err(KernelError::Closed));
    assert_eq!(
        kernel.dial(port(8080)).unwrap_err(),
        KernelError::Unavailable(port(8080))
    );
}

#[tokio::test]
async fn test_address_helpers() {
    let kernel = TestSystem::new().boot();
    let listener = listen_address(&kernel, "tcp", "127.0.0.1:8443").await.unwrap();
    assert_eq!(listener.port(), port(8443));

    let client = dial_address(&kernel, "tcp4", "localhost:8443").await.unwrap();
    let server = listener.accept().await.unwrap();
    client.write(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    server.read(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");

    assert!(matches!(
        dial_address(&kernel, "udp", ":8443").await,
        Err(KernelError::NotImplemented(_))
    ));
    assert!(matches!(
        dial_address(&kernel, "tcp", "example.com:80").await,
        Err(KernelError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_ephemeral_ports_are_distinct() {
    let kernel = Kernel::new(KernelConfig::default());
    let a = kernel.listen(port(0)).unwrap();
    let b = kernel.listen(port(0)).unwrap();

    assert!(!a.port().is_any());
    assert_ne!(a.port(), b.port());
    assert_eq!(kernel.resource_kind(a.handle()), Some(ResourceKind::Listener));
}
