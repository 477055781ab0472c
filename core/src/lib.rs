//! Skirmish Core - process and launch machinery
//!
//! This crate holds the leaf components the session layer is built from:
//!
//! - [`config`] - `config.toml` loading and per-mod installation settings
//! - [`net`] - local TCP port allocation
//! - [`process`] - spawning external processes and supervising them
//! - [`launch`] - building the game's argument vector
//! - [`keepalive`] - TCP keep-alive supervision of a helper process

pub mod config;
pub mod keepalive;
pub mod launch;
pub mod net;
pub mod process;

pub use config::{Config, ConfigError};
pub use keepalive::{
    KeepAlivePolicy, KeepAliveState, KeepAliveSupervisor, KeepAliveTracker, Probe, TcpProbe,
};
pub use launch::{LaunchCommandBuilder, LaunchError, LaunchParameters, ReplaySource};
pub use net::{EphemeralPorts, PortAllocator};
pub use process::{
    ExitOutcome, ExitWatch, KillHandle, Launcher, ManagedProcess, ProcessError, ProcessLauncher,
    SpawnRequest,
};
