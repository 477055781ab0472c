//! Game session coordination
//!
//! [`GameSessionCoordinator`] is the top-level authority for the one game session
//! a client can have. It folds server messages into the game registry, tracks
//! the current game and the running flag, and drives host/join/matchmaker/replay
//! launches through the [`GameProcesses`] orchestrator.
//!
//! # Threads
//!
//! All state is owned by a loop on a dedicated `game-session` thread. Launch
//! chains, process watchers and server calls run on the caller's worker runtime
//! and report back to that loop. Reads (`games`, `current_game`, `is_running`)
//! go through watch channels and work from any thread.
//!
//! # Ordering
//!
//! Server messages are applied in receipt order and drained before commands, so
//! a command always sees every message ingested before it.

mod actor;
mod chains;
mod events;
mod registry;


use std::io;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use skirmish_core::Config;
use skirmish_core::launch::ReplaySource;
use skirmish_shared::{Faction, GameId, NewGame, ServerMessage};

use crate::error::SessionError;
use crate::orchestrator::{GameProcesses, ReplayGame};
use crate::services::Services;

use actor::{Channels, Command, Reply, SessionActor};
use chains::ChainContext;

pub use chains::{LADDER_FEATURED_MOD, split_merged_args};
pub use events::{SessionEvent, Subscription};
pub use registry::{GameIndex, GameRef};

/// Behaviour switches taken from the config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Send `launch` once a joined game reaches the battleroom
    pub auto_launch: bool,
    /// Start the launch server helper for online games
    pub launch_server: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_launch: true,
            launch_server: false,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            auto_launch: config.game.auto_launch,
            launch_server: config.launch_server.enabled,
        }
    }
}

/// Handle to the session loop.
///
/// Dropping the handle shuts the loop down (the game process is killed).
pub struct GameSessionCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    messages: mpsc::UnboundedSender<ServerMessage>,
    games: watch::Receiver<GameIndex>,
    current: watch::Receiver<Option<GameId>>,
    running: watch::Receiver<bool>,
    events: broadcast::Sender<SessionEvent>,
}

impl GameSessionCoordinator {
    /// Spawn the `game-session` thread. Chains run on `workers`.
    pub fn start(
        services: Services,
        processes: Arc<dyn GameProcesses>,
        settings: SessionSettings,
        workers: Handle,
    ) -> io::Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (current_tx, current_rx) = watch::channel(None);
        let (running_tx, running_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(events::EVENT_CAPACITY);
        let (registry, games) = registry::Registry::new();

        let ctx = ChainContext {
            services,
            processes,
            launch_server: settings.launch_server,
        };
        let actor = SessionActor::new(
            ctx,
            workers,
            settings,
            registry,
            Channels {
                messages: message_rx,
                commands: command_rx,
                current: current_tx,
                running: running_tx,
                events: events.clone(),
            },
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        std::thread::Builder::new()
            .name("game-session".to_string())
            .spawn(move || runtime.block_on(actor.run()))?;

        Ok(Self {
            commands: command_tx,
            messages: message_tx,
            games,
            current: current_rx,
            running: running_rx,
            events,
        })
    }

    /// Queue a server message.
    pub fn ingest(&self, message: ServerMessage) {
        if self.messages.send(message).is_err() {
            tracing::debug!("Game session closed, dropping server message");
        }
    }

    /// Sender for the server client to push messages into.
    pub fn message_sink(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.messages.clone()
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Host a game. Resolves once the game process runs.
    pub async fn host_game(&self, game: NewGame) -> Result<(), SessionError> {
        self.request(|reply| Command::Host { game, reply }).await
    }

    /// Join a known game. Resolves once the game process runs.
    pub async fn join_game(
        &self,
        id: GameId,
        password: Option<String>,
    ) -> Result<(), SessionError> {
        self.request(|reply| Command::Join {
            id,
            password,
            reply,
        })
        .await
    }

    /// Enter the 1v1 matchmaker. Resolves once a matched game runs, or with
    /// [`SessionError::SearchCancelled`].
    pub async fn start_search_ladder_1v1(&self, faction: Faction) -> Result<(), SessionError> {
        self.request(|reply| Command::StartLadder { faction, reply })
            .await
    }

    pub fn stop_search_ladder_1v1(&self) {
        let _ = self.commands.send(Command::StopLadder);
    }

    pub async fn run_replay(
        &self,
        source: ReplaySource,
        replay_id: Option<u32>,
        featured_mod: impl Into<String>,
    ) -> Result<(), SessionError> {
        let replay = ReplayGame {
            featured_mod: featured_mod.into(),
            source,
            replay_id,
            map: None,
        };
        self.request(|reply| Command::Replay { replay, reply }).await
    }

    pub async fn start_offline(&self, featured_mod: impl Into<String>) -> Result<(), SessionError> {
        let featured_mod = featured_mod.into();
        self.request(|reply| Command::Offline {
            featured_mod,
            reply,
        })
        .await
    }

    /// Host the running (or last hosted) game again.
    ///
    /// While a game runs this only schedules the rehost for after it exits.
    pub async fn request_rehost(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Rehost { reply }).await
    }

    /// Kick a player from the game we host.
    pub async fn close_players_game(&self, player_id: u32) -> Result<(), SessionError> {
        self.request(|reply| Command::ClosePlayersGame { player_id, reply })
            .await
    }

    /// Resolves once everything queued before it was processed.
    pub async fn flush(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Flush { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the loop, killing the game and the launch server.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn games(&self) -> Vec<GameRef> {
        self.games.borrow().values().cloned().collect()
    }

    pub fn game(&self, id: GameId) -> Option<GameRef> {
        self.games.borrow().get(&id).cloned()
    }

    pub fn current_game_id(&self) -> Option<GameId> {
        *self.current.borrow()
    }

    pub fn current_game(&self) -> Option<GameRef> {
        self.current_game_id().and_then(|id| self.game(id))
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn watch_running(&self) -> watch::Receiver<bool> {
        self.running.clone()
    }

    pub fn watch_current_game(&self) -> watch::Receiver<Option<GameId>> {
        self.current.clone()
    }

    pub fn watch_games(&self) -> watch::Receiver<GameIndex> {
        self.games.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }
}
