//! # Host Runtime
//!
//! Boots a kernel with the demo guests and drives one demo to completion.

use crate::demos;
use core_types::Handle;
use kernel_api::{ConfigError, ExitStatus, KernelConfig, KernelError, OpenFlags, ProcAttr};
use sim_kernel::{Kernel, MemoryFileSystem, StaticResolver, TaskHost};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Host runtime error types
#[derive(Debug, Error)]
pub enum VosdError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Unknown demo: {0}")]
    UnknownDemo(String),
}

/// Which demo to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demo {
    /// One line through an echo server
    Echo,
    /// Ping rounds between two processes started by a worker
    Ping,
}

impl Demo {
    fn client(&self) -> &'static str {
        match self {
            Demo::Echo => "echo-client",
            Demo::Ping => "ping-worker",
        }
    }

    fn server(&self) -> Option<&'static str> {
        match self {
            Demo::Echo => Some("echo-server"),
            // the worker starts its own server
            Demo::Ping => None,
        }
    }
}

impl FromStr for Demo {
    type Err = VosdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo" => Ok(Demo::Echo),
            "ping" => Ok(Demo::Ping),
            other => Err(VosdError::UnknownDemo(other.to_string())),
        }
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Demo::Echo => f.write_str("echo"),
            Demo::Ping => f.write_str("ping"),
        }
    }
}

/// Host runtime configuration
#[derive(Debug, Clone)]
pub struct VosdConfig {
    /// Kernel tunables
    pub kernel: KernelConfig,
    /// Demo to run
    pub demo: Demo,
    /// Arguments passed to the demo client
    pub args: Vec<String>,
}

impl Default for VosdConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            demo: Demo::Echo,
            args: Vec::new(),
        }
    }
}

/// Outcome of one demo run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub demo: Demo,
    /// How the demo client ended
    pub status: ExitStatus,
    /// Lines the client wrote to its stdout
    pub transcript: Vec<String>,
}

/// Kernel plus the demo programs it can start
pub struct VosdRuntime {
    config: VosdConfig,
    kernel: Kernel,
    files: Arc<MemoryFileSystem>,
}

impl VosdRuntime {
    pub fn new(config: VosdConfig) -> Result<Self, VosdError> {
        config.kernel.validate()?;

        let host = Arc::new(TaskHost::new());
        let resolver = demos::install(&host, StaticResolver::new());
        let files = Arc::new(MemoryFileSystem::new());

        let kernel = Kernel::builder()
            .config(config.kernel.clone())
            .resolver(Arc::new(resolver))
            .host(host)
            .filesystem(files.clone())
            .build();

        Ok(Self {
            config,
            kernel,
            files,
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Runs the configured demo until its client ends
    ///
    /// The client's stdout is captured in a file and returned in the report.
    pub async fn run(&self) -> Result<DemoReport, VosdError> {
        let demo = self.config.demo;
        let transcript_path = format!("/var/log/{demo}.out");
        let transcript = self.kernel.open(
            &transcript_path,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
        )?;

        let server = match demo.server() {
            Some(program) => Some(
                self.kernel
                    .start_process(program, Vec::new(), ProcAttr::new())
                    .await?,
            ),
            None => None,
        };

        let attr = ProcAttr::new().with_files(vec![Handle::STDIN, transcript, Handle::STDERR]);
        let client = self
            .kernel
            .start_process(demo.client(), self.config.args.clone(), attr)
            .await?;
        tracing::info!(%demo, %client, "demo started");

        let status = self.kernel.wait(client).await?;
        if let Some(server) = server {
            self.kernel.close(server)?;
            self.kernel.wait(server).await?;
        }
        self.kernel.close(transcript)?;
        self.kernel.console().flush();
        tracing::info!(%demo, %status, "demo finished");

        let transcript = self
            .files
            .contents(&transcript_path)
            .map(|data| {
                String::from_utf8_lossy(&data)
                    .lines()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(DemoReport {
            demo,
            status,
            transcript,
        })
    }
}
