//! Local networking helpers
//!
//! - [`port`] - ephemeral port allocation for the console and launch-server ports

pub mod port;

pub use port::{EphemeralPorts, PortAllocator, is_port_in_use};
