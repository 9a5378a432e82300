//! # Console Log
//!
//! The sink behind the reserved stdout/stderr handles.
//!
//! ## Philosophy
//!
//! Console output is kept as structured entries, not raw bytes. Writes are
//! buffered per (process, stream) until a newline completes a line; each line
//! becomes a [`LogEntry`], goes out as a `tracing` event on the `console`
//! target, and is kept in a bounded history.

use core_types::Handle;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

/// Which console stream a write targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

impl ConsoleStream {
    /// Maps a reserved handle to its stream; other handles are not console
    pub fn from_handle(handle: Handle) -> Option<Self> {
        match handle {
            Handle::STDOUT => Some(ConsoleStream::Stdout),
            Handle::STDERR => Some(ConsoleStream::Stderr),
            _ => None,
        }
    }

    pub fn level(&self) -> LogLevel {
        match self {
            ConsoleStream::Stdout => LogLevel::Info,
            ConsoleStream::Stderr => LogLevel::Warn,
        }
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Process that wrote the line, `None` for the host itself
    pub source: Option<Handle>,
    pub stream: ConsoleStream,
    /// The line, without its terminator
    pub message: String,
}

impl LogEntry {
    pub fn new(stream: ConsoleStream, message: String) -> Self {
        Self {
            level: stream.level(),
            source: None,
            stream,
            message,
        }
    }

    /// Sets the source process
    pub fn with_source(mut self, source: Option<Handle>) -> Self {
        self.source = source;
        self
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(pid) => write!(f, "[{}] {}", pid.as_raw(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

type LineKey = (Option<Handle>, ConsoleStream);

struct SinkState {
    partial: HashMap<LineKey, Vec<u8>>,
    history: VecDeque<LogEntry>,
}

/// Line-buffered console
pub struct ConsoleSink {
    state: Mutex<SinkState>,
    history_limit: usize,
}

impl ConsoleSink {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(SinkState {
                partial: HashMap::new(),
                history: VecDeque::new(),
            }),
            history_limit,
        }
    }

    /// Appends bytes; every completed line is emitted
    ///
    /// Always accepts the whole buffer.
    pub fn write(&self, source: Option<Handle>, stream: ConsoleStream, data: &[u8]) -> usize {
        let mut state = self.lock();
        let pending = state.partial.entry((source, stream)).or_default();
        pending.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = pending.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        if pending.is_empty() {
            state.partial.remove(&(source, stream));
        }

        for line in lines {
            let entry = LogEntry::new(stream, String::from_utf8_lossy(&line).into_owned())
                .with_source(source);
            self.emit(&mut state, entry);
        }
        data.len()
    }

    /// Emits every unterminated line
    pub fn flush(&self) {
        let mut state = self.lock();
        let mut partial: Vec<_> = state.partial.drain().collect();
        partial.sort_by_key(|((source, stream), _)| (*source, *stream == ConsoleStream::Stderr));
        for ((source, stream), line) in partial {
            let entry = LogEntry::new(stream, String::from_utf8_lossy(&line).into_owned())
                .with_source(source);
            self.emit(&mut state, entry);
        }
    }

    /// Retained entries, oldest first
    pub fn history(&self) -> Vec<LogEntry> {
        self.lock().history.iter().cloned().collect()
    }

    /// Retained lines written by one process
    pub fn lines_from(&self, source: Handle) -> Vec<String> {
        self.lock()
            .history
            .iter()
            .filter(|entry| entry.source == Some(source))
            .map(|entry| entry.message.clone())
            .collect()
    }

    fn emit(&self, state: &mut SinkState, entry: LogEntry) {
        let pid = entry.source.map(|h| h.as_raw());
        match entry.level {
            LogLevel::Warn | LogLevel::Error => {
                tracing::warn!(target: "console", pid, "{}", entry.message)
            }
            _ => tracing::info!(target: "console", pid, "{}", entry.message),
        }

        if self.history_limit == 0 {
            return;
        }
        if state.history.len() == self.history_limit {
            state.history.pop_front();
        }
        state.history.push_back(entry);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new(1024)
    }
}
