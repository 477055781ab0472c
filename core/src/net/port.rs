//! Ephemeral TCP port allocation

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

/// Source of free local TCP ports.
pub trait PortAllocator: Send + Sync {
    /// Returns a port that was free at the time of the call.
    fn allocate(&self) -> io::Result<u16>;
}

/// Asks the OS for a free port by binding port 0 on the loopback interface.
///
/// The listener is dropped before returning, so another process may grab the
/// port in between. Callers hand the port straight to the process that binds it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralPorts;

impl PortAllocator for EphemeralPorts {
    fn allocate(&self) -> io::Result<u16> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
        let port = listener.local_addr()?.port();
        tracing::trace!(port, "Allocated ephemeral port");
        Ok(port)
    }
}

/// Check whether something is already listening on `port` (any interface).
pub fn is_port_in_use(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).is_err()
}
