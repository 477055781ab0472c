//! Game process orchestration
//!
//! [`GameProcessOrchestrator`] owns the external game process and the launch
//! server helper. It resolves executables from the per-mod installation
//! settings, builds the command line and hands the result to a [`Launcher`].
//!
//! The session coordinator drives it through the [`GameProcesses`] trait.

mod launch_server;


use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use skirmish_core::config::{self, Config, ConfigError, Installation};
use skirmish_core::keepalive::KeepAlivePolicy;
use skirmish_core::launch::{LaunchCommandBuilder, LaunchError, ReplaySource};
use skirmish_core::net::{EphemeralPorts, PortAllocator};
use skirmish_core::process::{
    Decoration, ExitWatch, Launcher, ManagedProcess, ProcessError, ProcessLauncher, SpawnRequest,
    free_port,
};
use skirmish_shared::{GameId, GameLaunch, WelcomeMessage};

use launch_server::LaunchServer;

/// Featured mod whose files the game loads without an init file
const DEFAULT_FEATURED_MOD: &str = "faf";

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no executable configured for featured mod '{0}'")]
    ExecutableNotConfigured(String),
    #[error("executable for featured mod '{featured_mod}' not found at {}", path.display())]
    ExecutableMissing { featured_mod: String, path: PathBuf },
    #[error("the game is already running")]
    AlreadyRunning,
    #[error("no launch server executable configured")]
    LaunchServerNotConfigured,
    #[error("could not allocate a local port: {0}")]
    Port(#[source] std::io::Error),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything needed to start an online game.
#[derive(Debug, Clone)]
pub struct OnlineGame {
    /// Grant from the server (host, join or matchmaker)
    pub launch: GameLaunch,
    pub player: WelcomeMessage,
    /// Peer relay port (`/gpgnet`)
    pub relay_port: u16,
    /// Replay capture port (`/savereplay`)
    pub replay_port: u16,
    pub launch_server_port: Option<u16>,
    pub rehost: bool,
}

#[derive(Debug, Clone)]
pub struct ReplayGame {
    pub featured_mod: String,
    pub source: ReplaySource,
    pub replay_id: Option<u32>,
    pub map: Option<String>,
}

/// Process control used by the session coordinator.
#[async_trait]
pub trait GameProcesses: Send + Sync {
    fn executable_installed(&self, featured_mod: &str) -> bool;

    /// Store (and persist) the executable chosen for `featured_mod`.
    fn set_executable(&self, featured_mod: &str, path: &Path) -> Result<(), OrchestratorError>;

    async fn start_game(&self, game: OnlineGame) -> Result<ExitWatch, OrchestratorError>;

    fn start_replay(&self, replay: ReplayGame) -> Result<ExitWatch, OrchestratorError>;

    fn start_offline(&self, featured_mod: &str) -> Result<ExitWatch, OrchestratorError>;

    /// Returns the helper's port. Reuses a healthy helper.
    fn start_launch_server(
        &self,
        featured_mod: &str,
        game_id: GameId,
    ) -> Result<u16, OrchestratorError>;

    fn stop_launch_server(&self);

    /// Best effort; failures are logged.
    async fn send_to_console(&self, command: &str);

    fn kill_game(&self);
}

/// Default [`GameProcesses`] implementation.
pub struct GameProcessOrchestrator {
    launcher: Arc<dyn Launcher>,
    ports: Arc<dyn PortAllocator>,
    config: Mutex<Config>,
    /// Where executable changes are saved; `None` keeps them in memory
    config_path: Option<PathBuf>,
    game: Mutex<Option<Arc<ManagedProcess>>>,
    launch_server: Mutex<Option<LaunchServer>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("Orchestrator mutex poisoned; continuing");
        e.into_inner()
    })
}

impl GameProcessOrchestrator {
    pub fn new(config: Config, launcher: Arc<dyn Launcher>, ports: Arc<dyn PortAllocator>) -> Self {
        Self {
            launcher,
            ports,
            config: Mutex::new(config),
            config_path: None,
            game: Mutex::new(None),
            launch_server: Mutex::new(None),
        }
    }

    /// Real processes and OS-assigned ports.
    pub fn from_config(config: Config) -> Self {
        let launcher = Arc::new(ProcessLauncher::from_config(&config.process));
        Self::new(config, launcher, Arc::new(EphemeralPorts))
    }

    /// Save executable changes to `path`.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> Config {
        lock(&self.config).clone()
    }

    pub fn is_game_running(&self) -> bool {
        lock(&self.game)
            .as_ref()
            .is_some_and(|game| game.is_alive())
    }

    fn resolve_executable(
        &self,
        featured_mod: &str,
    ) -> Result<(PathBuf, Option<PathBuf>), OrchestratorError> {
        let config = lock(&self.config);
        let installation = config
            .installation(featured_mod)
            .filter(|installation| installation.executable.is_some())
            .ok_or_else(|| OrchestratorError::ExecutableNotConfigured(featured_mod.to_string()))?;

        match installation.installed_executable() {
            Some(path) => Ok((path.to_path_buf(), installation.resolved_working_dir())),
            None => Err(OrchestratorError::ExecutableMissing {
                featured_mod: featured_mod.to_string(),
                path: installation.executable.clone().unwrap_or_default(),
            }),
        }
    }

    fn console_host(&self) -> IpAddr {
        let host = lock(&self.config).process.console_host.clone();
        host.parse().unwrap_or_else(|_| {
            tracing::warn!(%host, "Invalid console host, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        })
    }

    /// Common tail of every start: executable, console port, user extras.
    fn launch(
        &self,
        featured_mod: &str,
        builder: LaunchCommandBuilder,
    ) -> Result<ExitWatch, OrchestratorError> {
        let mut game = lock(&self.game);
        if game.as_ref().is_some_and(|game| game.is_alive()) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let (executable, working_dir) = self.resolve_executable(featured_mod)?;
        let additional_args = lock(&self.config).game.additional_args.clone();
        let console_port = self.ports.allocate().map_err(OrchestratorError::Port)?;
        let console = SocketAddr::new(self.console_host(), console_port);

        let mut builder = builder
            .executable(&executable)
            .console_port(console_port)
            .additional_args(&additional_args);
        if featured_mod != DEFAULT_FEATURED_MOD {
            builder = builder.init_file(format!("init_{}.lua", featured_mod));
        }
        let params = builder.build()?;

        let request = SpawnRequest::new("game", params.into_argv())
            .working_dir(working_dir)
            .console(console)
            .decoration(Decoration::CompatLayer);
        let process = self.launcher.launch(request)?;

        tracing::info!(featured_mod, pid = ?process.pid(), %console, "Game started");
        let exit = process.exit_watch();
        *game = Some(Arc::new(process));
        Ok(exit)
    }
}

#[async_trait]
impl GameProcesses for GameProcessOrchestrator {
    fn executable_installed(&self, featured_mod: &str) -> bool {
        lock(&self.config)
            .installation(featured_mod)
            .and_then(Installation::installed_executable)
            .is_some()
    }

    fn set_executable(&self, featured_mod: &str, path: &Path) -> Result<(), OrchestratorError> {
        let mut config = lock(&self.config);
        config
            .installations
            .entry(featured_mod.to_string())
            .or_default()
            .executable = Some(path.to_path_buf());
        tracing::info!(featured_mod, path = %path.display(), "Game executable set");

        if let Some(ref config_path) = self.config_path {
            config::save_to(&config, config_path)?;
        }
        Ok(())
    }

    async fn start_game(&self, game: OnlineGame) -> Result<ExitWatch, OrchestratorError> {
        if self.is_game_running() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let network = lock(&self.config).network.clone();
        free_port(
            network.game_port,
            &network.blocking_executables,
            Duration::from_millis(network.free_port_timeout_ms),
        )
        .await;

        let OnlineGame {
            launch,
            player,
            relay_port,
            replay_port,
            launch_server_port,
            rehost,
        } = game;

        tracing::info!(
            game_id = launch.uid,
            featured_mod = %launch.featured_mod,
            rating_mode = launch.rating_mode.as_str(),
            "Starting online game"
        );

        let mut builder = LaunchCommandBuilder::new()
            .uid(launch.uid)
            .username(player.login)
            .local_relay_port(relay_port)
            .local_replay_port(replay_port)
            .rehost(rehost)
            .server_args(launch.args);
        if let Some(country) = player.country {
            builder = builder.country(country);
        }
        if let Some(clan) = player.clan {
            builder = builder.clan(clan);
        }
        if let Some((mean, deviation)) = player.rating {
            builder = builder.rating(mean, deviation);
        }
        if let Some(division) = player.division {
            builder = builder.division(division);
        }
        if let Some(subdivision) = player.subdivision {
            builder = builder.subdivision(subdivision);
        }
        if let Some(faction) = launch.faction {
            builder = builder.faction(faction);
        }
        if let Some(team) = launch.team {
            builder = builder.team(team);
        }
        if let Some(players) = launch.expected_players {
            builder = builder.expected_players(players);
        }
        if let Some(position) = launch.map_position {
            builder = builder.map_position(position);
        }
        if let Some(map) = launch.map {
            builder = builder.map(map);
        }
        if let Some(port) = launch_server_port {
            builder = builder.launch_server_port(port);
        }

        self.launch(&launch.featured_mod, builder)
    }

    fn start_replay(&self, replay: ReplayGame) -> Result<ExitWatch, OrchestratorError> {
        tracing::info!(
            featured_mod = %replay.featured_mod,
            source = ?replay.source,
            "Starting replay"
        );
        let mut builder = LaunchCommandBuilder::new().replay(replay.source);
        if let Some(id) = replay.replay_id {
            builder = builder.replay_id(id);
        }
        if let Some(map) = replay.map {
            builder = builder.map(map);
        }
        self.launch(&replay.featured_mod, builder)
    }

    fn start_offline(&self, featured_mod: &str) -> Result<ExitWatch, OrchestratorError> {
        tracing::info!(featured_mod, "Starting offline game");
        self.launch(featured_mod, LaunchCommandBuilder::new())
    }

    fn start_launch_server(
        &self,
        featured_mod: &str,
        game_id: GameId,
    ) -> Result<u16, OrchestratorError> {
        let (settings, policy) = {
            let config = lock(&self.config);
            (
                config.launch_server.clone(),
                KeepAlivePolicy::from(&config.keep_alive),
            )
        };

        let mut slot = lock(&self.launch_server);
        if let Some(existing) = slot.as_ref()
            && existing.is_reusable(settings.elevate)
        {
            tracing::debug!(port = existing.port(), "Launch server already running");
            return Ok(existing.port());
        }
        if let Some(stale) = slot.take() {
            stale.stop();
        }

        let port = self.ports.allocate().map_err(OrchestratorError::Port)?;
        let server = LaunchServer::spawn(
            self.launcher.as_ref(),
            &settings,
            policy,
            port,
            featured_mod,
            game_id,
        )?;
        *slot = Some(server);
        Ok(port)
    }

    fn stop_launch_server(&self) {
        if let Some(server) = lock(&self.launch_server).take() {
            server.stop();
        }
    }

    async fn send_to_console(&self, command: &str) {
        let game = lock(&self.game).clone();
        let Some(game) = game else {
            tracing::debug!(command, "No game process to send to");
            return;
        };
        if let Err(e) = game.send(command).await {
            tracing::warn!(command, "Console command failed: {}", e);
        }
    }

    fn kill_game(&self) {
        if let Some(game) = lock(&self.game).as_ref() {
            game.kill();
        }
    }
}
