//! Collaborators that turn a program reference into a running context
//!
//! [`ArtifactResolver`] stands in for the build/fetch pipeline: it maps a
//! program reference to a location, or fails with a message the kernel
//! passes through untouched. [`ExecutionHost`] instantiates a nested context
//! from that location and hands it the client end of its tunnel.

use crate::guest::{run_guest, GuestContext};
use core_types::Handle;
use kernel_api::{BoxFuture, KernelResult, ProcAttr, StreamLimits};
use remote_ipc::ClientPort;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::AbortHandle;

/// Resolves program references to executable locations
pub trait ArtifactResolver: Send + Sync {
    fn resolve<'a>(&'a self, program: &'a str) -> BoxFuture<'a, Result<String, String>>;
}

/// Everything a host needs to start one process
pub struct LaunchSpec {
    pub pid: Handle,
    pub location: String,
    pub argv0: String,
    pub args: Vec<String>,
    pub attr: ProcAttr,
    /// Client end of the tunnel back to the owning kernel
    pub tunnel: ClientPort,
    pub limits: StreamLimits,
}

/// A running nested context
pub trait WorkerInstance: Send + Sync {
    /// Stops the context; must be safe to call more than once
    fn terminate(&self);
}

/// Instantiates nested execution contexts
pub trait ExecutionHost: Send + Sync {
    fn launch(&self, spec: LaunchSpec) -> BoxFuture<'_, Result<Box<dyn WorkerInstance>, String>>;
}

/// Resolver backed by a fixed table
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    programs: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>, location: impl Into<String>) -> Self {
        self.programs.insert(program.into(), location.into());
        self
    }
}

impl ArtifactResolver for StaticResolver {
    fn resolve<'a>(&'a self, program: &'a str) -> BoxFuture<'a, Result<String, String>> {
        Box::pin(async move {
            self.programs
                .get(program)
                .cloned()
                .ok_or_else(|| format!("cannot find package {program:?}"))
        })
    }
}

/// Entry point of an in-process guest program
pub type GuestProgram =
    Arc<dyn Fn(GuestContext) -> BoxFuture<'static, KernelResult<()>> + Send + Sync>;

/// Runs registered guest programs as Tokio tasks
///
/// Each location names one program. A launched program talks to its owner
/// only through the tunnel in its [`LaunchSpec`].
#[derive(Default)]
pub struct TaskHost {
    programs: Mutex<HashMap<String, GuestProgram>>,
}

impl TaskHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `program` under `location`, replacing any earlier one
    pub fn register<F, Fut>(&self, location: impl Into<String>, program: F)
    where
        F: Fn(GuestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = KernelResult<()>> + Send + 'static,
    {
        let program: GuestProgram =
            Arc::new(move |ctx| -> BoxFuture<'static, KernelResult<()>> { Box::pin(program(ctx)) });
        self.programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(location.into(), program);
    }

    fn program(&self, location: &str) -> Option<GuestProgram> {
        self.programs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
    }
}

impl ExecutionHost for TaskHost {
    fn launch(&self, spec: LaunchSpec) -> BoxFuture<'_, Result<Box<dyn WorkerInstance>, String>> {
        Box::pin(async move {
            let program = self
                .program(&spec.location)
                .ok_or_else(|| format!("no program at {}", spec.location))?;
            let task = tokio::spawn(run_guest(spec, program));
            let instance: Box<dyn WorkerInstance> = Box::new(TaskInstance {
                task: task.abort_handle(),
            });
            Ok(instance)
        })
    }
}

struct TaskInstance {
    task: AbortHandle,
}

impl WorkerInstance for TaskInstance {
    fn terminate(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new().with_program("echo", "mem://echo");
        assert_eq!(resolver.resolve("echo").await, Ok("mem://echo".to_string()));
        assert_eq!(
            resolver.resolve("missing").await,
            Err("cannot find package \"missing\"".to_string())
        );
    }

    #[tokio::test]
    async fn test_launch_unknown_location() {
        let host = TaskHost::new();
        let (tunnel, _server) = remote_ipc::tunnel();
        let spec = LaunchSpec {
            pid: Handle::from_raw(10_000),
            location: "mem://nothing".to_string(),
            argv0: "nothing".to_string(),
            args: Vec::new(),
            attr: ProcAttr::new(),
            tunnel,
            limits: StreamLimits::default(),
        };
        let err = host.launch(spec).await.err().unwrap();
        assert_eq!(err, "no program at mem://nothing");
    }
}
