//! Kernel configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a [`KernelConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one kernel instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// First value issued by the handle allocator
    pub first_handle: u64,
    /// Messages a connection buffers before it closes itself
    pub recv_buffer_capacity: usize,
    /// Accepted-but-unclaimed connections per listener
    pub listener_backlog: usize,
    /// Messages buffered per pipe
    pub pipe_capacity: usize,
    /// First port tried for `listen(0)`
    pub ephemeral_port_start: u16,
    /// Console lines retained for inspection
    pub console_history: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            first_handle: 10_000,
            recv_buffer_capacity: i16::MAX as usize,
            listener_backlog: 64,
            pipe_capacity: 16,
            ephemeral_port_start: 49_152,
            console_history: 1024,
        }
    }
}

impl KernelConfig {
    /// Parses and validates a JSON config
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_handle < 3 {
            return Err(ConfigError::Invalid(
                "first_handle must be above the console range".to_string(),
            ));
        }
        if self.recv_buffer_capacity == 0 || self.listener_backlog == 0 || self.pipe_capacity == 0
        {
            return Err(ConfigError::Invalid(
                "buffer capacities must be at least 1".to_string(),
            ));
        }
        if self.ephemeral_port_start == 0 {
            return Err(ConfigError::Invalid(
                "ephemeral_port_start must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_first_handle(mut self, first: u64) -> Self {
        self.first_handle = first;
        self
    }

    pub fn with_recv_buffer_capacity(mut self, capacity: usize) -> Self {
        self.recv_buffer_capacity = capacity;
        self
    }

    pub fn with_listener_backlog(mut self, backlog: usize) -> Self {
        self.listener_backlog = backlog;
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    pub fn with_ephemeral_port_start(mut self, port: u16) -> Self {
        self.ephemeral_port_start = port;
        self
    }

    pub fn with_console_history(mut self, lines: usize) -> Self {
        self.console_history = lines;
        self
    }

    /// Limits handed to every connection and listener
    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits::new(self.recv_buffer_capacity, self.listener_backlog)
    }
}

/// Buffer limits for streams and listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLimits {
    pub recv_buffer_capacity: usize,
    pub listener_backlog: usize,
}

impl StreamLimits {
    /// Builds limits, raising zero capacities to one
    pub fn new(recv_buffer_capacity: usize, listener_backlog: usize) -> Self {
        Self {
            recv_buffer_capacity: recv_buffer_capacity.max(1),
            listener_backlog: listener_backlog.max(1),
        }
    }
}

impl Default for StreamLimits {
    fn default() -> Self {
        KernelConfig::default().stream_limits()
    }
}
