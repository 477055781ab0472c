//! Game command line construction
//!
//! - [`builder`] - [`LaunchCommandBuilder`], validated into [`LaunchParameters`]
//! - [`args`] - tokenizing, allow-list filtering and quoting of free-form switches

pub mod args;
pub mod builder;

use thiserror::Error;

pub use builder::{LaunchCommandBuilder, LaunchParameters, ReplaySource};

/// Launch command validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("executable path is not set")]
    MissingExecutable,
    #[error("a replay source cannot be combined with a game uid")]
    ReplayWithUid,
    #[error("a game uid requires a username")]
    UidWithoutUsername,
}
