//! Shared types for the Skirmish game client.
//!
//! These are the values exchanged with the lobby server (game-info snapshots,
//! player info, launch grants) plus the local game record model built from them.
//! Everything here is plain data; the session logic lives in `skirmish-library`.

pub mod game;
pub mod messages;
pub mod player;

pub use game::{GameId, GameInfoMessage, GameRecord, GameStatus, GameVisibility, NewGame};
pub use messages::{GameLaunch, RatingMode, ServerMessage, WelcomeMessage};
pub use player::{Faction, PlayerInfo, PlayerStatus};
