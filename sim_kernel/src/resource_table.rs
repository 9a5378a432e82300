//! Handle-to-resource mapping
//!
//! The table is only touched under the kernel's one mutex. It never blocks
//! and never runs teardown itself: removal hands the resource back so the
//! caller can tear it down after releasing the lock.

use crate::pipe::Pipe;
use crate::process::Worker;
use core_types::{Handle, VirtualPort};
use ipc::{ListenerFrame, PortSender, StreamFrame};
use kernel_api::{ExitStatus, KernelError, KernelResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Kind of resource a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Listener,
    Connection,
    Worker,
    PipeReader,
    PipeWriter,
    File,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Listener => "listener",
            ResourceKind::Connection => "connection",
            ResourceKind::Worker => "process",
            ResourceKind::PipeReader => "pipe reader",
            ResourceKind::PipeWriter => "pipe writer",
            ResourceKind::File => "file",
        };
        f.write_str(name)
    }
}

/// Kernel-side view of a dialed stream
///
/// Holds a sender toward each end so the owner can tear the stream down no
/// matter which context holds the connection objects.
pub(crate) struct StreamCloser {
    pub(crate) to_dialer: PortSender<StreamFrame>,
    pub(crate) to_acceptor: PortSender<StreamFrame>,
}

impl StreamCloser {
    pub(crate) fn close(&self) {
        let _ = self.to_dialer.post(StreamFrame::Close);
        let _ = self.to_acceptor.post(StreamFrame::Close);
    }
}

pub(crate) enum Resource {
    Listener {
        port: VirtualPort,
        frames: PortSender<ListenerFrame>,
    },
    Connection(StreamCloser),
    Worker(Arc<Worker>),
    PipeReader(Arc<Pipe>),
    PipeWriter(Arc<Pipe>),
    /// Descriptor owned by the file backend
    File(u64),
}

impl Resource {
    pub(crate) fn kind(&self) -> ResourceKind {
        match self {
            Resource::Listener { .. } => ResourceKind::Listener,
            Resource::Connection(_) => ResourceKind::Connection,
            Resource::Worker(_) => ResourceKind::Worker,
            Resource::PipeReader(_) => ResourceKind::PipeReader,
            Resource::PipeWriter(_) => ResourceKind::PipeWriter,
            Resource::File(_) => ResourceKind::File,
        }
    }
}

/// Exit records kept for late waiters; the oldest are forgotten first
const EXIT_RECORDS: usize = 4096;

pub(crate) struct ResourceTable {
    entries: HashMap<Handle, Resource>,
    /// Port bindings, each pointing at a `Resource::Listener` entry
    ports: HashMap<VirtualPort, Handle>,
    /// Handles each live process created through its tunnel
    owned: HashMap<Handle, HashSet<Handle>>,
    owner_of: HashMap<Handle, Handle>,
    /// Outcomes of processes that are gone from `entries`
    exited: HashMap<Handle, ExitStatus>,
    exit_order: VecDeque<Handle>,
    exit_capacity: usize,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::with_exit_capacity(EXIT_RECORDS)
    }
}

impl ResourceTable {
    pub(crate) fn with_exit_capacity(exit_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ports: HashMap::new(),
            owned: HashMap::new(),
            owner_of: HashMap::new(),
            exited: HashMap::new(),
            exit_order: VecDeque::new(),
            exit_capacity: exit_capacity.max(1),
        }
    }

    pub(crate) fn get(&self, handle: Handle) -> Option<&Resource> {
        self.entries.get(&handle)
    }

    pub(crate) fn kind(&self, handle: Handle) -> Option<ResourceKind> {
        self.entries.get(&handle).map(Resource::kind)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, handle: Handle, resource: Resource) {
        tracing::debug!(%handle, kind = %resource.kind(), "resource registered");
        self.entries.insert(handle, resource);
    }

    /// Registers a listener and binds its port
    pub(crate) fn bind(
        &mut self,
        handle: Handle,
        port: VirtualPort,
        frames: PortSender<ListenerFrame>,
    ) -> KernelResult<()> {
        self.evict_stale(port);
        if self.ports.contains_key(&port) {
            return Err(KernelError::AlreadyBound(port));
        }
        self.ports.insert(port, handle);
        self.insert(handle, Resource::Listener { port, frames });
        Ok(())
    }

    pub(crate) fn listener_on(
        &mut self,
        port: VirtualPort,
    ) -> Option<(Handle, &PortSender<ListenerFrame>)> {
        self.evict_stale(port);
        let handle = *self.ports.get(&port)?;
        match self.entries.get(&handle) {
            Some(Resource::Listener { frames, .. }) => Some((handle, frames)),
            _ => None,
        }
    }

    /// Frees `port` if its listener's far end is gone
    ///
    /// A listener dropped inside a killed process never gets its close
    /// through, so its binding is reclaimed on next use of the port.
    fn evict_stale(&mut self, port: VirtualPort) {
        let Some(&handle) = self.ports.get(&port) else {
            return;
        };
        let stale = matches!(
            self.entries.get(&handle),
            Some(Resource::Listener { frames, .. }) if frames.is_closed()
        );
        if stale {
            tracing::debug!(%handle, %port, "reclaiming port from vanished listener");
            self.remove(handle);
        }
    }

    /// First unbound port at or after `start`
    pub(crate) fn free_port(&mut self, start: u16) -> Option<VirtualPort> {
        (start..=u16::MAX).map(VirtualPort::new).find(|&port| {
            self.evict_stale(port);
            !self.ports.contains_key(&port)
        })
    }

    /// Records `handles` as created by process `pid`
    ///
    /// Returns false if `pid` is no longer a live process; the caller then
    /// owns the handles and must release them.
    pub(crate) fn claim(&mut self, pid: Handle, handles: &[Handle]) -> bool {
        if !matches!(self.entries.get(&pid), Some(Resource::Worker(_))) {
            return false;
        }
        let owned = self.owned.entry(pid).or_default();
        for &handle in handles {
            owned.insert(handle);
            self.owner_of.insert(handle, pid);
        }
        true
    }

    /// Forgets what `pid` owns and returns the handles still live
    pub(crate) fn take_owned(&mut self, pid: Handle) -> Vec<Handle> {
        let owned = self.owned.remove(&pid).unwrap_or_default();
        for handle in &owned {
            self.owner_of.remove(handle);
        }
        owned
            .into_iter()
            .filter(|handle| self.entries.contains_key(handle))
            .collect()
    }

    /// Removes an entry, unbinding its port if it is a listener
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<Resource> {
        let resource = self.entries.remove(&handle)?;
        if let Some(pid) = self.owner_of.remove(&handle) {
            if let Some(owned) = self.owned.get_mut(&pid) {
                owned.remove(&handle);
            }
        }
        if let Resource::Listener { port, .. } = &resource {
            if self.ports.get(port) == Some(&handle) {
                self.ports.remove(port);
            }
        }
        tracing::debug!(%handle, kind = %resource.kind(), "resource removed");
        Some(resource)
    }

    /// Removes a live process and records how it ended
    pub(crate) fn remove_worker(&mut self, pid: Handle, status: ExitStatus) -> Option<Arc<Worker>> {
        match self.entries.get(&pid) {
            Some(Resource::Worker(_)) => {}
            _ => return None,
        }
        match self.remove(pid) {
            Some(Resource::Worker(worker)) => {
                self.record_exit(pid, status);
                Some(worker)
            }
            _ => None,
        }
    }

    fn record_exit(&mut self, pid: Handle, status: ExitStatus) {
        if self.exited.insert(pid, status).is_none() {
            self.exit_order.push_back(pid);
        }
        while self.exit_order.len() > self.exit_capacity {
            if let Some(oldest) = self.exit_order.pop_front() {
                self.exited.remove(&oldest);
            }
        }
    }

    pub(crate) fn exit_status(&self, pid: Handle) -> Option<ExitStatus> {
        self.exited.get(&pid).copied()
    }
}
