//! Process Supervision Tests
//!
//! Validates the lifecycle of nested processes:
//! - Wait blocks until the process exits or is killed
//! - Killed processes stop and their waiters wake at once
//! - A dropped tunnel is reported as a disconnect
//! - Nested processes share the owner's network namespace

use core_types::Handle;
use kernel_api::{BoxFuture, ExitStatus, KernelError, ProcAttr};
use sim_kernel::{
    ExecutionHost, Kernel, LaunchSpec, ResourceKind, StaticResolver, Syscalls, WorkerInstance,
};
use std::sync::Arc;
use std::time::Duration;
use tests_resilience::{port, read_to_end, wait_for_listener, TestSystem};
use tokio::sync::Notify;

#[tokio::test]
async fn test_wait_returns_after_exit() {
    let release = Arc::new(Notify::new());
    let kernel = {
        let release = release.clone();
        TestSystem::new()
            .program("sleeper", move |_ctx| {
                let release = release.clone();
                async move {
                    release.notified().await;
                    Ok(())
                }
            })
            .boot()
    };

    let pid = kernel
        .start_process("sleeper", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    assert_eq!(kernel.resource_kind(pid), Some(ResourceKind::Worker));

    let waiter = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.wait(pid).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    release.notify_one();
    assert_eq!(waiter.await.unwrap(), Ok(ExitStatus::Exited));
    assert_eq!(kernel.resource_kind(pid), None);
}

#[tokio::test]
async fn test_close_kills_and_wakes_waiter() {
    let kernel = TestSystem::new()
        .program("forever", |_ctx| async move {
            std::future::pending::<()>().await;
            Ok(())
        })
        .boot();

    let pid = kernel
        .start_process("forever", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    let waiter = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.wait(pid).await })
    };
    tokio::task::yield_now().await;

    kernel.close(pid).unwrap();
    assert_eq!(waiter.await.unwrap(), Ok(ExitStatus::Killed));

    // waiting on an ended process returns immediately
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Killed));
    kernel.close(pid).unwrap();
}

#[tokio::test]
async fn test_killed_process_loses_its_tunnel() {
    let kernel = TestSystem::new()
        .program("listener", |ctx| async move {
            let listener = ctx.kernel.listen(port(9000)).await?;
            let _conn = listener.accept().await?;
            Ok(())
        })
        .boot();

    let pid = kernel
        .start_process("listener", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    wait_for_listener(&kernel, port(9000)).await;

    kernel.close(pid).unwrap();
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Killed));

    // the guest's listener drops with its task and releases the port
    for _ in 0..100 {
        if kernel.listener_on(port(9000)).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(kernel.listener_on(port(9000)).is_none());
}

#[tokio::test]
async fn test_killed_process_releases_its_handles() {
    let ready = Arc::new(Notify::new());
    let kernel = {
        let ready = ready.clone();
        TestSystem::new()
            .program("hoarder", move |ctx| {
                let ready = ready.clone();
                async move {
                    let _conn = ctx.kernel.dial(port(9100)).await?;
                    let _pipe = ctx.kernel.pipe().await?;
                    let _listener = ctx.kernel.listen(port(9101)).await?;
                    ready.notify_one();
                    std::future::pending::<()>().await;
                    Ok(())
                }
            })
            .boot()
    };

    let listener = kernel.listen(port(9100)).unwrap();
    let baseline = kernel.resource_count();

    let pid = kernel
        .start_process("hoarder", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    ready.notified().await;
    let server = listener.accept().await.unwrap();
    // worker, connection, two pipe ends, listener
    assert_eq!(kernel.resource_count(), baseline + 5);

    kernel.close(pid).unwrap();
    assert_eq!(kernel.resource_count(), baseline);
    assert!(kernel.listener_on(port(9101)).is_none());

    let mut buf = [0u8; 4];
    assert_eq!(server.read(&mut buf).await, Ok(0));
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Killed));
}

struct HangUpHost;

struct Detached;

impl WorkerInstance for Detached {
    fn terminate(&self) {}
}

impl ExecutionHost for HangUpHost {
    fn launch(&self, spec: LaunchSpec) -> BoxFuture<'_, Result<Box<dyn WorkerInstance>, String>> {
        Box::pin(async move {
            drop(spec.tunnel);
            let instance: Box<dyn WorkerInstance> = Box::new(Detached);
            Ok(instance)
        })
    }
}

#[tokio::test]
async fn test_dropped_tunnel_is_disconnect() {
    let kernel = Kernel::builder()
        .resolver(Arc::new(
            StaticResolver::new().with_program("flaky", "host://flaky"),
        ))
        .host(Arc::new(HangUpHost))
        .build();

    let pid = kernel
        .start_process("flaky", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Disconnected));
}

#[tokio::test]
async fn test_parent_dials_guest_listener() {
    let kernel = TestSystem::new()
        .program("echo", |ctx| async move {
            let listener = ctx.kernel.listen(port(9000)).await?;
            let conn = listener.accept().await?;
            let mut buf = [0u8; 64];
            loop {
                let n = conn.read(&mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                conn.write(&buf[..n]).await?;
            }
        })
        .boot();

    let pid = kernel
        .start_process("echo", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    wait_for_listener(&kernel, port(9000)).await;

    let conn = kernel.dial(port(9000)).unwrap();
    conn.write(b"marco").await.unwrap();
    let mut buf = [0u8; 5];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"marco");

    conn.close().unwrap();
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Exited));
}

#[tokio::test]
async fn test_guest_dials_parent_listener() {
    let kernel = TestSystem::new()
        .program("client", |ctx| async move {
            let conn = ctx.kernel.dial(port(9100)).await?;
            for arg in &ctx.args {
                conn.write(arg.as_bytes()).await?;
            }
            conn.close()
        })
        .boot();
    let listener = kernel.listen(port(9100)).unwrap();

    let args = vec!["one ".to_string(), "two ".to_string(), "three".to_string()];
    let pid = kernel
        .start_process("client", args, ProcAttr::new())
        .await
        .unwrap();

    let server = listener.accept().await.unwrap();
    assert_eq!(read_to_end(&server).await.unwrap(), b"one two three");
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Exited));
}

#[tokio::test]
async fn test_guest_starts_and_waits_for_child() {
    let kernel = TestSystem::new()
        .program("child", |ctx| async move { ctx.println("child ran").await })
        .program("parent", |ctx| async move {
            let child = ctx
                .kernel
                .start_process("child", Vec::new(), ProcAttr::new())
                .await?;
            let status = ctx.kernel.wait(child).await?;
            ctx.println(&format!("child {} {}", child.as_raw(), status))
                .await
        })
        .boot();

    let pid = kernel
        .start_process("parent", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Exited));

    let lines = kernel.console().lines_from(pid);
    assert_eq!(lines.len(), 1);
    let child: u64 = lines[0]
        .strip_prefix("child ")
        .and_then(|rest| rest.split(' ').next())
        .and_then(|raw| raw.parse().ok())
        .unwrap();
    assert_eq!(
        kernel.console().lines_from(Handle::from_raw(child)),
        vec!["child ran"]
    );
    assert!(child > pid.as_raw());
}

#[tokio::test]
async fn test_guest_error_is_reported_on_stderr() {
    let kernel = TestSystem::new()
        .program("broken", |ctx| async move {
            ctx.kernel.dial(port(1)).await?;
            Ok(())
        })
        .boot();

    let pid = kernel
        .start_process("broken", Vec::new(), ProcAttr::new())
        .await
        .unwrap();
    assert_eq!(kernel.wait(pid).await, Ok(ExitStatus::Exited));

    let lines = kernel.console().lines_from(pid);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("broken: "), "{}", lines[0]);
}

#[tokio::test]
async fn test_unknown_program_fails_verbatim() {
    let kernel = TestSystem::new().boot();
    let err = kernel
        .start_process("missing", Vec::new(), ProcAttr::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        KernelError::SpawnFailed("cannot find package \"missing\"".to_string())
    );
}

#[tokio::test]
async fn test_guest_sees_env_and_handles_from_shared_allocator() {
    let kernel = TestSystem::new()
        .program("env", |ctx| async move {
            let handle = ctx.kernel.next_handle().await?;
            let name = ctx.env_var("NAME").unwrap_or("nobody").to_string();
            ctx.println(&format!("{name} {}", handle.as_raw())).await
        })
        .boot();

    let before = kernel.next_handle();
    let pid = kernel
        .start_process("env", Vec::new(), ProcAttr::new().with_env("NAME=guest"))
        .await
        .unwrap();
    kernel.wait(pid).await.unwrap();
    let after = kernel.next_handle();

    let lines = kernel.console().lines_from(pid);
    let (name, raw) = lines[0].split_once(' ').unwrap();
    let guest_handle: u64 = raw.parse().unwrap();
    assert_eq!(name, "guest");
    assert!(guest_handle > before.as_raw() && guest_handle < after.as_raw());
}
