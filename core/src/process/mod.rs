//! External process management
//!
//! - [`launcher`] - turns a [`SpawnRequest`] into a running OS process
//! - [`managed`] - [`ManagedProcess`], the single handle over a process's exit,
//!   kill switch and TCP console
//! - [`port_guard`] - frees the game's well-known port before an online start

pub mod launcher;
pub mod managed;
pub mod port_guard;

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub use launcher::{Decoration, Launcher, ProcessLauncher, SpawnRequest};
pub use managed::{ExitOutcome, ExitWatch, KillHandle, ManagedProcess};
pub use port_guard::free_port;

/// Process spawning and control errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command line for {0}")]
    EmptyCommand(String),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} has no console port")]
    NoConsole(String),
    #[error("{0} is not running")]
    NotRunning(String),
    #[error("timed out connecting to console at {0}")]
    ConsoleTimeout(SocketAddr),
    #[error("console at {addr} failed: {source}")]
    Console {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}
