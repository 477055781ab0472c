//! Session owner loop
//!
//! All session state lives in [`SessionActor`] and is only touched on the
//! `game-session` thread. Chains and process watchers run on the worker pool and
//! report back over the internal channel.

use std::future::Future;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use skirmish_core::ExitOutcome;
use skirmish_shared::{
    Faction, GameId, GameInfoMessage, GameStatus, NewGame, PlayerInfo, PlayerStatus,
    ServerMessage, WelcomeMessage,
};

use super::SessionSettings;
use super::chains::{self, ChainContext, JoinTarget, Launched, SessionKind};
use super::events::SessionEvent;
use super::registry::{Applied, Registry};
use crate::error::SessionError;
use crate::orchestrator::ReplayGame;

pub(super) type Reply = oneshot::Sender<Result<(), SessionError>>;

/// Requests from the public handle
pub(super) enum Command {
    Host { game: NewGame, reply: Reply },
    Join { id: GameId, password: Option<String>, reply: Reply },
    StartLadder { faction: Faction, reply: Reply },
    StopLadder,
    Replay { replay: ReplayGame, reply: Reply },
    Offline { featured_mod: String, reply: Reply },
    Rehost { reply: Reply },
    ClosePlayersGame { player_id: u32, reply: Reply },
    Flush { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Results marshalled back from the worker pool
enum Internal {
    FlowFinished {
        flow: u64,
        result: Result<Launched, SessionError>,
        reply: Option<Reply>,
        outcome: FlowOutcome,
    },
    ProcessExited {
        session: u64,
        outcome: ExitOutcome,
    },
}

/// What to remember if a flow succeeds
#[derive(Default)]
struct FlowOutcome {
    hosted: Option<NewGame>,
    joined: Option<(GameId, Option<String>)>,
}

/// Chain currently in flight
struct Flow {
    id: u64,
    /// Set for a matchmaker search
    search: Option<CancellationToken>,
}

/// Game process currently running
struct ActiveSession {
    id: u64,
    kind: SessionKind,
    /// Held by launches queued behind a superseded flow that started this game
    release: Option<CancellationToken>,
}

pub(super) struct Channels {
    pub messages: mpsc::UnboundedReceiver<ServerMessage>,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub current: watch::Sender<Option<GameId>>,
    pub running: watch::Sender<bool>,
    pub events: broadcast::Sender<SessionEvent>,
}

pub(super) struct SessionActor {
    owner: Option<ThreadId>,
    ctx: Arc<ChainContext>,
    workers: Handle,
    settings: SessionSettings,

    registry: Registry,
    current: watch::Sender<Option<GameId>>,
    running: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,

    player: Option<WelcomeMessage>,
    player_game: Option<GameId>,
    player_status: PlayerStatus,

    flow: Option<Flow>,
    next_flow: u64,
    /// Superseded flows still running, cancelled once their result is handled
    draining: HashMap<u64, CancellationToken>,
    session: Option<ActiveSession>,
    /// Cancelled once the last online teardown has finished
    teardown: Option<CancellationToken>,
    pending_rehost: Option<NewGame>,
    last_hosted: Option<NewGame>,
    auto_launched: Option<GameId>,
    closing: CancellationToken,

    messages: mpsc::UnboundedReceiver<ServerMessage>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl SessionActor {
    pub(super) fn new(
        ctx: ChainContext,
        workers: Handle,
        settings: SessionSettings,
        registry: Registry,
        channels: Channels,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            owner: None,
            ctx: Arc::new(ctx),
            workers,
            settings,
            registry,
            current: channels.current,
            running: channels.running,
            events: channels.events,
            player: None,
            player_game: None,
            player_status: PlayerStatus::Idle,
            flow: None,
            next_flow: 1,
            draining: HashMap::new(),
            session: None,
            teardown: None,
            pending_rehost: None,
            last_hosted: None,
            auto_launched: None,
            closing: CancellationToken::new(),
            messages: channels.messages,
            commands: channels.commands,
            internal_tx,
            internal_rx,
        }
    }

    pub(super) async fn run(mut self) {
        self.owner = Some(thread::current().id());
        tracing::debug!("Game session loop started");

        loop {
            tokio::select! {
                biased;
                Some(message) = self.messages.recv() => self.handle_message(message),
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        tracing::debug!("Game session loop stopped");
    }

    fn assert_owner(&self) {
        debug_assert_eq!(
            self.owner,
            Some(thread::current().id()),
            "session state touched off the game-session thread"
        );
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn current(&self) -> Option<GameId> {
        *self.current.borrow()
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    fn set_current(&mut self, current: Option<GameId>) {
        self.assert_owner();
        let previous = self.current.send_replace(current);
        if previous != current {
            tracing::debug!(?previous, ?current, "Current game changed");
            self.emit(SessionEvent::CurrentGameChanged { previous, current });
        }
    }

    fn set_running(&mut self, running: bool) {
        self.assert_owner();
        if self.running.send_replace(running) != running {
            self.emit(SessionEvent::RunningChanged(running));
        }
    }

    // ---- server messages ----

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::GameInfo(info) => self.ingest(info),
            ServerMessage::PlayerInfo(info) => self.player_info(info),
            ServerMessage::Welcome(welcome) => self.welcome(welcome),
        }
    }

    fn ingest(&mut self, info: GameInfoMessage) {
        self.assert_owner();
        let id = info.uid;

        let previous = match self.registry.apply(&info) {
            Applied::Ignored => {
                tracing::debug!(game_id = id, "Ignoring end of unknown game");
                return;
            }
            Applied::Removed => {
                self.emit(SessionEvent::GameRemoved(id));
                if self.current() == Some(id) {
                    self.set_current(None);
                }
                return;
            }
            Applied::Added => {
                self.emit(SessionEvent::GameAdded(id));
                GameStatus::Unknown
            }
            Applied::Updated { previous } => {
                self.emit(SessionEvent::GameUpdated(id));
                previous
            }
            Applied::Unchanged => info.state,
        };

        if info.state.is_open() && self.player_game == Some(id) {
            self.set_current(Some(id));
        } else if let Some(current) = self.current()
            && self.player_game != Some(current)
        {
            self.set_current(None);
        }

        if info.state == GameStatus::Battleroom && previous != GameStatus::Battleroom {
            self.maybe_auto_launch(id);
        }
    }

    fn player_info(&mut self, info: PlayerInfo) {
        self.assert_owner();
        let Some(ref player) = self.player else {
            return;
        };
        if info.login != player.login {
            return;
        }

        tracing::debug!(game_id = ?info.game_id, status = ?info.status, "Local player updated");
        self.player_game = info.game_id;
        self.player_status = info.status;

        match (self.current(), self.player_game) {
            (Some(current), tracked) if tracked != Some(current) => self.set_current(None),
            (None, Some(tracked))
                if self
                    .registry
                    .status(tracked)
                    .is_some_and(GameStatus::is_open) =>
            {
                self.set_current(Some(tracked))
            }
            _ => {}
        }

        if info.status == PlayerStatus::Joining
            && let Some(tracked) = self.player_game
            && self.registry.status(tracked) == Some(GameStatus::Battleroom)
        {
            self.maybe_auto_launch(tracked);
        }
    }

    fn welcome(&mut self, welcome: WelcomeMessage) {
        self.assert_owner();
        tracing::info!(login = %welcome.login, "Logged in");
        self.player = Some(welcome);

        if let Some(ActiveSession {
            kind: SessionKind::Online { game_id },
            ..
        }) = self.session
        {
            tracing::info!(game_id, "Restoring game session after reconnect");
            let server = self.ctx.services.server.clone();
            self.workers.spawn(async move {
                if let Err(e) = server.restore_game_session(game_id).await {
                    tracing::warn!(game_id, "Could not restore game session: {}", e);
                }
            });
        }
    }

    /// Send `launch` once per game, whichever of the battleroom and joining
    /// updates arrives last.
    fn maybe_auto_launch(&mut self, id: GameId) {
        if !self.settings.auto_launch
            || self.auto_launched == Some(id)
            || self.current() != Some(id)
            || self.player_status != PlayerStatus::Joining
            || !self.is_running()
        {
            return;
        }

        tracing::info!(game_id = id, "Game reached battleroom, launching");
        self.auto_launched = Some(id);
        let processes = self.ctx.processes.clone();
        self.workers.spawn(async move {
            processes.send_to_console("launch").await;
        });
    }

    // ---- commands ----

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Host { game, reply } => self.start_host(game, Some(reply), false),
            Command::Join {
                id,
                password,
                reply,
            } => self.start_join(id, password, reply),
            Command::StartLadder { faction, reply } => self.start_ladder(faction, reply),
            Command::StopLadder => self.stop_ladder(),
            Command::Replay { replay, reply } => {
                if let Err(e) = self.check_idle(false) {
                    let _ = reply.send(Err(e));
                    return;
                }
                let chain = chains::replay(self.ctx.clone(), replay);
                self.begin_flow(chain, Some(reply), None, FlowOutcome::default());
            }
            Command::Offline {
                featured_mod,
                reply,
            } => {
                if let Err(e) = self.check_idle(false) {
                    let _ = reply.send(Err(e));
                    return;
                }
                let chain = chains::offline(self.ctx.clone(), featured_mod);
                self.begin_flow(chain, Some(reply), None, FlowOutcome::default());
            }
            Command::Rehost { reply } => self.rehost(reply),
            Command::ClosePlayersGame { player_id, reply } => {
                let server = self.ctx.services.server.clone();
                self.workers.spawn(async move {
                    let result = server.close_players_game(player_id).await;
                    let _ = reply.send(result.map_err(SessionError::from));
                });
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            // Handled by the loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Reject while a game runs or another launch is in flight. A matchmaker
    /// search gives way to host/join when `cancel_search` is set; the new
    /// launch then waits until the search flow has wound down.
    fn check_idle(&mut self, cancel_search: bool) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::AlreadyRunning);
        }
        match self.flow.take() {
            None => Ok(()),
            Some(Flow {
                id,
                search: Some(token),
            }) if cancel_search => {
                tracing::info!(flow = id, "Cancelling matchmaker search");
                token.cancel();
                self.draining.insert(id, CancellationToken::new());
                Ok(())
            }
            Some(flow) => {
                self.flow = Some(flow);
                Err(SessionError::LaunchInProgress)
            }
        }
    }

    fn local_player(&self) -> Result<WelcomeMessage, SessionError> {
        self.player.clone().ok_or(SessionError::NotLoggedIn)
    }

    fn start_host(&mut self, game: NewGame, reply: Option<Reply>, rehost: bool) {
        let prepared = self
            .check_idle(true)
            .and_then(|()| self.local_player());
        let player = match prepared {
            Ok(player) => player,
            Err(e) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                } else {
                    tracing::warn!("Could not rehost: {}", e);
                }
                return;
            }
        };

        tracing::info!(
            title = %game.title,
            featured_mod = %game.featured_mod,
            rehost,
            "Hosting game"
        );
        let chain = chains::host(self.ctx.clone(), player, game.clone(), rehost);
        let outcome = FlowOutcome {
            hosted: Some(game),
            joined: None,
        };
        self.begin_flow(chain, reply, None, outcome);
    }

    fn start_join(&mut self, id: GameId, password: Option<String>, reply: Reply) {
        let prepared = self.check_idle(true).and_then(|()| {
            let player = self.local_player()?;
            let record = self.registry.get(id).ok_or(SessionError::UnknownGame(id))?;
            Ok((player, record))
        });
        let (player, record) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        tracing::info!(game_id = id, "Joining game");
        let chain = chains::join(
            self.ctx.clone(),
            player,
            JoinTarget::new(&record, password.clone()),
        );
        let outcome = FlowOutcome {
            hosted: None,
            joined: Some((id, password)),
        };
        self.begin_flow(chain, Some(reply), None, outcome);
    }

    fn start_ladder(&mut self, faction: Faction, reply: Reply) {
        let player = match self.check_idle(false).and_then(|()| self.local_player()) {
            Ok(player) => player,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let token = CancellationToken::new();
        let chain = chains::ladder(self.ctx.clone(), player, faction, token.clone());
        self.begin_flow(chain, Some(reply), Some(token), FlowOutcome::default());
    }

    fn stop_ladder(&mut self) {
        if let Some(Flow {
            search: Some(ref token),
            ..
        }) = self.flow
        {
            tracing::info!("Matchmaker search cancelled");
            token.cancel();
        }
    }

    fn rehost(&mut self, reply: Reply) {
        if self.is_running() {
            let next = match self.session {
                Some(ActiveSession {
                    kind: SessionKind::Online { game_id },
                    ..
                }) => self
                    .registry
                    .get(game_id)
                    .map(|record| NewGame::from_record(&record))
                    .or_else(|| self.last_hosted.clone()),
                _ => self.last_hosted.clone(),
            };
            let result = match next {
                Some(next) => {
                    tracing::info!(title = %next.title, "Rehost scheduled after game exit");
                    self.pending_rehost = Some(next);
                    Ok(())
                }
                None => Err(SessionError::NothingToRehost),
            };
            let _ = reply.send(result);
            return;
        }

        match self.last_hosted.clone() {
            Some(game) => self.start_host(game, Some(reply), true),
            None => {
                let _ = reply.send(Err(SessionError::NothingToRehost));
            }
        }
    }

    fn begin_flow<F>(
        &mut self,
        chain: F,
        reply: Option<Reply>,
        search: Option<CancellationToken>,
        outcome: FlowOutcome,
    ) where
        F: Future<Output = Result<Launched, SessionError>> + Send + 'static,
    {
        self.assert_owner();
        let id = self.next_flow;
        self.next_flow += 1;
        self.flow = Some(Flow { id, search });

        // Superseded flows and online teardown touch the same relay and
        // replay services, so the chain starts only after they are done.
        let waits: Vec<CancellationToken> = self
            .draining
            .values()
            .chain(self.teardown.as_ref())
            .filter(|wait| !wait.is_cancelled())
            .cloned()
            .collect();
        let closing = self.closing.clone();
        let internal = self.internal_tx.clone();
        self.workers.spawn(async move {
            let result = if settled(waits, closing).await {
                chain.await
            } else {
                Err(SessionError::Closed)
            };
            let _ = internal.send(Internal::FlowFinished {
                flow: id,
                result,
                reply,
                outcome,
            });
        });
    }

    // ---- results from the worker pool ----

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::FlowFinished {
                flow,
                result,
                reply,
                outcome,
            } => self.flow_finished(flow, result, reply, outcome),
            Internal::ProcessExited { session, outcome } => {
                self.process_exited(session, outcome)
            }
        }
    }

    fn flow_finished(
        &mut self,
        flow: u64,
        result: Result<Launched, SessionError>,
        reply: Option<Reply>,
        outcome: FlowOutcome,
    ) {
        self.assert_owner();
        let release = self.draining.remove(&flow);
        if !self.flow.as_ref().is_some_and(|current| current.id == flow) {
            self.superseded_flow_finished(flow, result, release);
            if let Some(reply) = reply {
                let _ = reply.send(Err(SessionError::SearchCancelled));
            }
            return;
        }
        self.flow = None;

        let result = result.map(|launched| {
            self.game_started(flow, launched, None);
            if let Some(game) = outcome.hosted {
                self.last_hosted = Some(game);
            }
            if let Some((id, password)) = outcome.joined {
                self.registry.set_password(id, password);
            }
        });

        if let Err(ref e) = result {
            if e.is_user_facing() {
                tracing::warn!("Game launch failed: {}", e);
                self.ctx
                    .services
                    .notifications
                    .error("Could not start the game", &e.to_string());
            } else {
                tracing::debug!("Launch flow ended: {}", e);
            }
        }

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// A flow cancelled in favour of another launch. Its game, if it got one
    /// started anyway, is stopped and torn down before the queued launch runs.
    fn superseded_flow_finished(
        &mut self,
        flow: u64,
        result: Result<Launched, SessionError>,
        release: Option<CancellationToken>,
    ) {
        match result {
            Ok(launched) => {
                tracing::warn!(flow, "Superseded launch started a game, stopping it");
                self.game_started(flow, launched, release);
                self.ctx.processes.kill_game();
            }
            Err(e) => {
                tracing::debug!(flow, "Superseded launch ended: {}", e);
                if let Some(release) = release {
                    release.cancel();
                }
            }
        }
    }

    fn game_started(
        &mut self,
        session: u64,
        launched: Launched,
        release: Option<CancellationToken>,
    ) {
        if let Some(previous) = self.session.as_ref() {
            tracing::warn!(session = previous.id, "Replacing a running session");
        }
        self.session = Some(ActiveSession {
            id: session,
            kind: launched.kind,
            release,
        });
        self.auto_launched = None;
        self.set_running(true);

        let internal = self.internal_tx.clone();
        let exit = launched.exit;
        self.workers.spawn(async move {
            let outcome = exit.wait().await;
            let _ = internal.send(Internal::ProcessExited { session, outcome });
        });
    }

    fn process_exited(&mut self, session: u64, outcome: ExitOutcome) {
        self.assert_owner();
        let Some(active) = self.session.take_if(|active| active.id == session) else {
            return;
        };

        tracing::info!(code = ?outcome.code, killed = outcome.killed, "Game exited");
        self.set_running(false);
        self.set_current(None);
        self.auto_launched = None;

        match active.kind {
            SessionKind::Online { game_id } => {
                let done = CancellationToken::new();
                self.teardown = Some(done.clone());
                let release = active.release;
                let services = self.ctx.services.clone();
                self.workers.spawn(async move {
                    let _done = done.drop_guard();
                    let _release = release.map(CancellationToken::drop_guard);
                    chains::teardown_online(&services, game_id).await;
                });
            }
            SessionKind::Offline => {
                if let Some(release) = active.release {
                    release.cancel();
                }
            }
        }

        // Queued behind the teardown by begin_flow
        if let Some(game) = self.pending_rehost.take() {
            tracing::info!(title = %game.title, "Rehosting");
            self.start_host(game, None, true);
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Shutting down game session");
        self.closing.cancel();
        self.stop_ladder();
        self.ctx.processes.kill_game();
        self.ctx.processes.stop_launch_server();

        if let Some(ActiveSession {
            kind: SessionKind::Online { game_id },
            ..
        }) = self.session.take()
        {
            chains::teardown_online(&self.ctx.services, game_id).await;
        }
        if let Some(teardown) = self.teardown.take() {
            teardown.cancelled().await;
        }
    }
}

/// Wait for everything a new launch is queued behind. False if the session
/// shut down first.
async fn settled(waits: Vec<CancellationToken>, closing: CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = closing.cancelled() => false,
        _ = async {
            for wait in &waits {
                wait.cancelled().await;
            }
        } => true,
    }
}
