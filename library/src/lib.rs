//! Skirmish Library
//!
//! Session layer of the Skirmish client. It sits between the lobby server
//! connection and the game process:
//!
//! - [`orchestrator`] - starts the game, replays and the launch server helper
//! - [`session`] - game registry, current game tracking and launch flows
//! - [`services`] - traits for the server client, content services and UI hooks
//!
//! The game itself is always an external process; a crash there never takes
//! the client down.

pub mod error;
pub mod orchestrator;
pub mod services;
pub mod session;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::SessionError;
pub use orchestrator::{GameProcessOrchestrator, GameProcesses, OrchestratorError};
pub use services::{ServiceError, Services};
pub use session::{GameRef, GameSessionCoordinator, SessionEvent, SessionSettings, Subscription};
