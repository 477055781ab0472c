//! External collaborators of the session layer
//!
//! The server protocol client, content services and UI hooks live outside this
//! crate. The coordinator only talks to them through these traits.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use thiserror::Error;

use skirmish_shared::{Faction, GameId, GameLaunch, NewGame};

/// Collaborator failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("server rejected the request: {0}")]
    Rejected(String),
    #[error("not connected to the server")]
    Disconnected,
    #[error("operation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Requests to the lobby server.
#[async_trait]
pub trait ServerClient: Send + Sync {
    /// Reserve a hosted game; resolves with the launch grant.
    async fn request_host_game(&self, game: &NewGame) -> Result<GameLaunch, ServiceError>;

    async fn request_join_game(
        &self,
        id: GameId,
        password: Option<&str>,
    ) -> Result<GameLaunch, ServiceError>;

    /// Enter the 1v1 matchmaker; resolves once a match was found.
    async fn start_search_ladder_1v1(&self, faction: Faction) -> Result<GameLaunch, ServiceError>;

    async fn stop_search_ladder_1v1(&self) -> Result<(), ServiceError>;

    /// Kick a player from the game we host.
    async fn close_players_game(&self, player_id: u32) -> Result<(), ServiceError>;

    async fn notify_game_ended(&self) -> Result<(), ServiceError>;

    /// Ask the server to re-attach a running game after a reconnect.
    async fn restore_game_session(&self, id: GameId) -> Result<(), ServiceError>;
}

/// Featured mod and sim mod installation.
#[async_trait]
pub trait ModService: Send + Sync {
    async fn update_featured_mod(
        &self,
        featured_mod: &str,
        versions: &HashMap<String, u32>,
    ) -> Result<(), ServiceError>;

    async fn ensure_sim_mods(&self, uids: &[String]) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait MapService: Send + Sync {
    async fn ensure_map(&self, map: &str) -> Result<(), ServiceError>;
}

/// Asks the user where the game executable lives.
#[async_trait]
pub trait PathSelection: Send + Sync {
    /// `None` if the user gave up.
    async fn select_executable(&self, featured_mod: &str) -> Option<PathBuf>;
}

/// User-facing error reporting.
pub trait Notifications: Send + Sync {
    fn error(&self, title: &str, message: &str);
}

/// Local peer-connectivity relay the game talks GPGNet to.
#[async_trait]
pub trait PeerRelay: Send + Sync {
    /// Returns the local port the game should connect to.
    async fn start(&self, game_id: GameId) -> Result<u16, ServiceError>;
    async fn stop(&self);
}

/// Local server that receives the live replay stream from the game.
#[async_trait]
pub trait ReplayCapture: Send + Sync {
    /// Returns the local port the game should stream to.
    async fn start(&self, game_id: GameId) -> Result<u16, ServiceError>;
    async fn stop(&self);
}

/// All collaborators, shared with the worker pool.
#[derive(Clone)]
pub struct Services {
    pub server: Arc<dyn ServerClient>,
    pub mods: Arc<dyn ModService>,
    pub maps: Arc<dyn MapService>,
    pub paths: Arc<dyn PathSelection>,
    pub notifications: Arc<dyn Notifications>,
    pub relay: Arc<dyn PeerRelay>,
    pub replays: Arc<dyn ReplayCapture>,
}
