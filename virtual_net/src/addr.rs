//! Stream addresses

use core_types::{Handle, VirtualPort};
use kernel_api::{KernelError, KernelResult};
use std::fmt;

/// Hosts that resolve to the local virtual namespace
const LOCAL_HOSTS: [&str; 4] = ["", "127.0.0.1", "0.0.0.0", "localhost"];

/// One end of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnAddr {
    /// A bound virtual port (the accepting side of a connection)
    Port(VirtualPort),
    /// A handle with no port (the dialing side of a connection)
    Handle(Handle),
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnAddr::Port(port) => write!(f, "127.0.0.1:{}", port.as_u16()),
            ConnAddr::Handle(handle) => write!(f, "handle:{}", handle.as_raw()),
        }
    }
}

/// Parses `host:port` for a `tcp`/`tcp4` network into a virtual port
pub fn parse_tcp_address(network: &str, address: &str) -> KernelResult<VirtualPort> {
    if !matches!(network, "tcp" | "tcp4") {
        return Err(KernelError::not_implemented(format!(
            "network {network:?} not supported"
        )));
    }

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| KernelError::invalid(format!("missing port in address {address:?}")))?;

    if !LOCAL_HOSTS.contains(&host) {
        return Err(KernelError::invalid(format!(
            "host {host:?} is not reachable from the virtual network"
        )));
    }

    port.parse::<u16>()
        .map(VirtualPort::new)
        .map_err(|_| KernelError::invalid(format!("invalid port {port:?}")))
}
