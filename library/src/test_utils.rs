//! Shared test utilities: tracing setup and in-memory collaborators

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use tokio::sync::oneshot;

use skirmish_core::{ExitOutcome, ExitWatch, ManagedProcess};
use skirmish_shared::{Faction, GameId, GameLaunch, NewGame};

use crate::orchestrator::{GameProcesses, OnlineGame, OrchestratorError, ReplayGame};
use crate::services::{
    MapService, ModService, Notifications, PathSelection, PeerRelay, ReplayCapture, ServerClient,
    ServiceError, Services,
};

/// Route `tracing` output to the test harness. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Ordered log of collaborator calls, shared by all fakes.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    /// Position of `entry`, for ordering assertions.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }

    /// Positions of every occurrence of `entry`.
    pub fn positions(&self, entry: &str) -> Vec<usize> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == entry)
            .map(|(i, _)| i)
            .collect()
    }
}

// ============================================================================
// Services
// ============================================================================

/// Game id the fake server grants for hosted games
pub const HOSTED_GAME_ID: GameId = 42;
pub const RELAY_PORT: u16 = 7237;
pub const REPLAY_PORT: u16 = 15000;

#[derive(Default)]
pub struct FakeServer {
    journal: Journal,
    pub reject: AtomicBool,
    /// Grant returned by the matchmaker; searches hang while unset
    pub ladder_match: Mutex<Option<GameLaunch>>,
    /// How long reporting a game end takes
    pub game_ended_delay: Mutex<Option<Duration>>,
}

#[async_trait]
impl ServerClient for FakeServer {
    async fn request_host_game(&self, game: &NewGame) -> Result<GameLaunch, ServiceError> {
        self.journal.push(format!("server.host {}", game.title));
        if self.reject.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("host refused".to_string()));
        }
        Ok(GameLaunch::new(HOSTED_GAME_ID, game.featured_mod.clone()))
    }

    async fn request_join_game(
        &self,
        id: GameId,
        password: Option<&str>,
    ) -> Result<GameLaunch, ServiceError> {
        self.journal
            .push(format!("server.join {} {}", id, password.unwrap_or("-")));
        if self.reject.load(Ordering::SeqCst) {
            return Err(ServiceError::Rejected("join refused".to_string()));
        }
        Ok(GameLaunch::new(id, "faf"))
    }

    async fn start_search_ladder_1v1(&self, faction: Faction) -> Result<GameLaunch, ServiceError> {
        self.journal.push(format!("server.search {}", faction.as_str()));
        let grant = self.ladder_match.lock().unwrap().clone();
        match grant {
            Some(grant) => Ok(grant),
            None => std::future::pending().await,
        }
    }

    async fn stop_search_ladder_1v1(&self) -> Result<(), ServiceError> {
        self.journal.push("server.stop_search");
        Ok(())
    }

    async fn close_players_game(&self, player_id: u32) -> Result<(), ServiceError> {
        self.journal.push(format!("server.close_players_game {player_id}"));
        Ok(())
    }

    async fn notify_game_ended(&self) -> Result<(), ServiceError> {
        let delay = *self.game_ended_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.journal.push("server.game_ended");
        Ok(())
    }

    async fn restore_game_session(&self, id: GameId) -> Result<(), ServiceError> {
        self.journal.push(format!("server.restore {id}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMods {
    journal: Journal,
}

#[async_trait]
impl ModService for FakeMods {
    async fn update_featured_mod(
        &self,
        featured_mod: &str,
        _versions: &HashMap<String, u32>,
    ) -> Result<(), ServiceError> {
        self.journal.push(format!("mods.update {featured_mod}"));
        Ok(())
    }

    async fn ensure_sim_mods(&self, uids: &[String]) -> Result<(), ServiceError> {
        self.journal.push(format!("mods.sim {}", uids.join(",")));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMaps {
    journal: Journal,
    pub fail: AtomicBool,
    /// Map whose download never finishes
    pub stall: Mutex<Option<String>>,
}

#[async_trait]
impl MapService for FakeMaps {
    async fn ensure_map(&self, map: &str) -> Result<(), ServiceError> {
        self.journal.push(format!("maps.ensure {map}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Other(anyhow::anyhow!("map download failed")));
        }
        let stalled = self.stall.lock().unwrap().as_deref() == Some(map);
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePaths {
    journal: Journal,
    /// What the user "picks"
    pub answer: Mutex<Option<PathBuf>>,
}

#[async_trait]
impl PathSelection for FakePaths {
    async fn select_executable(&self, featured_mod: &str) -> Option<PathBuf> {
        self.journal.push(format!("paths.select {featured_mod}"));
        self.answer.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct FakeNotifications {
    pub errors: Mutex<Vec<(String, String)>>,
}

impl FakeNotifications {
    pub fn count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl Notifications for FakeNotifications {
    fn error(&self, title: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

#[derive(Default)]
pub struct FakeRelay {
    journal: Journal,
}

#[async_trait]
impl PeerRelay for FakeRelay {
    async fn start(&self, game_id: GameId) -> Result<u16, ServiceError> {
        self.journal.push(format!("relay.start {game_id}"));
        Ok(RELAY_PORT)
    }

    async fn stop(&self) {
        self.journal.push("relay.stop");
    }
}

#[derive(Default)]
pub struct FakeReplays {
    journal: Journal,
    pub fail: AtomicBool,
}

#[async_trait]
impl ReplayCapture for FakeReplays {
    async fn start(&self, game_id: GameId) -> Result<u16, ServiceError> {
        self.journal.push(format!("replays.start {game_id}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Other(anyhow::anyhow!("replay server down")));
        }
        Ok(REPLAY_PORT)
    }

    async fn stop(&self) {
        self.journal.push("replays.stop");
    }
}

// ============================================================================
// Processes
// ============================================================================

/// In-memory game processes. The game runs until [`exit_game`](Self::exit_game)
/// or a kill.
#[derive(Default)]
pub struct FakeProcesses {
    journal: Journal,
    installed: Mutex<HashSet<String>>,
    pub started: Mutex<Vec<OnlineGame>>,
    pub fail_start: AtomicBool,
    game: Mutex<Option<(ManagedProcess, Option<oneshot::Sender<i32>>)>>,
}

impl FakeProcesses {
    pub fn install(&self, featured_mod: &str) {
        self.installed
            .lock()
            .unwrap()
            .insert(featured_mod.to_string());
    }

    pub fn last_started(&self) -> Option<OnlineGame> {
        self.started.lock().unwrap().last().cloned()
    }

    /// Let the running game exit on its own.
    pub fn exit_game(&self, code: i32) {
        if let Some((_, exit)) = self.game.lock().unwrap().as_mut()
            && let Some(exit) = exit.take()
        {
            let _ = exit.send(code);
        }
    }

    fn spawn(&self, entry: String) -> Result<ExitWatch, OrchestratorError> {
        let mut game = self.game.lock().unwrap();
        if game.as_ref().is_some_and(|(process, _)| process.is_alive()) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.journal.push(entry);

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let process = ManagedProcess::from_task("game", None, |kill| async move {
            tokio::select! {
                _ = kill.cancelled() => ExitOutcome { code: None, killed: true },
                code = exit_rx => ExitOutcome { code: code.ok(), killed: false },
            }
        });
        let exit = process.exit_watch();
        *game = Some((process, Some(exit_tx)));
        Ok(exit)
    }
}

#[async_trait]
impl GameProcesses for FakeProcesses {
    fn executable_installed(&self, featured_mod: &str) -> bool {
        self.installed.lock().unwrap().contains(featured_mod)
    }

    fn set_executable(&self, featured_mod: &str, path: &Path) -> Result<(), OrchestratorError> {
        self.journal
            .push(format!("set_executable {} {}", featured_mod, path.display()));
        self.install(featured_mod);
        Ok(())
    }

    async fn start_game(&self, game: OnlineGame) -> Result<ExitWatch, OrchestratorError> {
        if self.fail_start.load(Ordering::SeqCst) {
            self.journal.push(format!("start_game.failed {}", game.launch.uid));
            return Err(OrchestratorError::Port(std::io::Error::from(
                std::io::ErrorKind::AddrInUse,
            )));
        }
        let exit = self.spawn(format!("start_game {}", game.launch.uid))?;
        self.started.lock().unwrap().push(game);
        Ok(exit)
    }

    fn start_replay(&self, replay: ReplayGame) -> Result<ExitWatch, OrchestratorError> {
        self.spawn(format!("start_replay {}", replay.featured_mod))
    }

    fn start_offline(&self, featured_mod: &str) -> Result<ExitWatch, OrchestratorError> {
        self.spawn(format!("start_offline {featured_mod}"))
    }

    fn start_launch_server(
        &self,
        featured_mod: &str,
        game_id: GameId,
    ) -> Result<u16, OrchestratorError> {
        self.journal
            .push(format!("launch_server.start {featured_mod} {game_id}"));
        Ok(4711)
    }

    fn stop_launch_server(&self) {
        self.journal.push("launch_server.stop");
    }

    async fn send_to_console(&self, command: &str) {
        self.journal.push(format!("console {command}"));
    }

    fn kill_game(&self) {
        if let Some((process, _)) = self.game.lock().unwrap().as_ref()
            && process.is_alive()
        {
            self.journal.push("kill_game");
            process.kill();
        }
    }
}

/// All fakes, wired to one journal.
pub struct Fakes {
    pub journal: Journal,
    pub server: Arc<FakeServer>,
    pub maps: Arc<FakeMaps>,
    pub paths: Arc<FakePaths>,
    pub notifications: Arc<FakeNotifications>,
    pub replays: Arc<FakeReplays>,
    pub processes: Arc<FakeProcesses>,
    pub services: Services,
}

impl Fakes {
    pub fn new() -> Self {
        let journal = Journal::default();
        let server = Arc::new(FakeServer {
            journal: journal.clone(),
            ..Default::default()
        });
        let maps = Arc::new(FakeMaps {
            journal: journal.clone(),
            ..Default::default()
        });
        let paths = Arc::new(FakePaths {
            journal: journal.clone(),
            ..Default::default()
        });
        let notifications = Arc::new(FakeNotifications::default());
        let replays = Arc::new(FakeReplays {
            journal: journal.clone(),
            ..Default::default()
        });
        let processes = Arc::new(FakeProcesses {
            journal: journal.clone(),
            ..Default::default()
        });
        let services = Services {
            server: server.clone(),
            mods: Arc::new(FakeMods {
                journal: journal.clone(),
            }),
            maps: maps.clone(),
            paths: paths.clone(),
            notifications: notifications.clone(),
            relay: Arc::new(FakeRelay {
                journal: journal.clone(),
            }),
            replays: replays.clone(),
        };

        Self {
            journal,
            server,
            maps,
            paths,
            notifications,
            replays,
            processes,
            services,
        }
    }
}
