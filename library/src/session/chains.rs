//! Launch chains
//!
//! Each flow (host, join, ladder, replay, offline) is one async chain run on the
//! worker pool. A failing link returns early; nothing on the owner thread is
//! touched until the chain's result is handed back.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio_util::sync::CancellationToken;

use skirmish_core::ExitWatch;
use skirmish_shared::{
    Faction, GameId, GameLaunch, GameRecord, NewGame, RatingMode, WelcomeMessage,
};

use crate::error::SessionError;
use crate::orchestrator::{GameProcesses, OnlineGame, ReplayGame};
use crate::services::Services;

/// Featured mod of the 1v1 matchmaker
pub const LADDER_FEATURED_MOD: &str = "ladder1v1";

pub(super) struct ChainContext {
    pub services: Services,
    pub processes: Arc<dyn GameProcesses>,
    /// Start the launch server helper for online games
    pub launch_server: bool,
}

/// How a running game is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SessionKind {
    Online { game_id: GameId },
    Offline,
}

pub(super) struct Launched {
    pub exit: ExitWatch,
    pub kind: SessionKind,
}

/// Join inputs taken from the registry on the owner thread.
pub(super) struct JoinTarget {
    pub id: GameId,
    pub password: Option<String>,
    pub featured_mod: String,
    pub versions: HashMap<String, u32>,
    pub sim_mods: Vec<String>,
    pub map: String,
}

impl JoinTarget {
    pub(super) fn new(record: &GameRecord, password: Option<String>) -> Self {
        Self {
            id: record.id(),
            password,
            featured_mod: record.featured_mod.clone(),
            versions: record.featured_mod_versions.clone(),
            sim_mods: record.sim_mods.keys().cloned().collect(),
            map: record.map.clone(),
        }
    }
}

pub(super) async fn host(
    ctx: Arc<ChainContext>,
    player: WelcomeMessage,
    game: NewGame,
    rehost: bool,
) -> Result<Launched, SessionError> {
    ensure_executable(&ctx, &game.featured_mod).await?;
    let sim_mods: Vec<String> = game.sim_mods.iter().cloned().collect();
    prepare_content(&ctx, &game.featured_mod, &HashMap::new(), &sim_mods, &game.map).await?;

    let mut launch = ctx.services.server.request_host_game(&game).await?;
    tracing::info!(game_id = launch.uid, title = %game.title, rehost, "Host reservation granted");
    launch.rating_mode = RatingMode::Global;
    if launch.map.is_none() {
        launch.map = Some(game.map.clone());
    }

    launch_online(&ctx, player, launch, rehost, None).await
}

pub(super) async fn join(
    ctx: Arc<ChainContext>,
    player: WelcomeMessage,
    target: JoinTarget,
) -> Result<Launched, SessionError> {
    ensure_executable(&ctx, &target.featured_mod).await?;
    prepare_content(
        &ctx,
        &target.featured_mod,
        &target.versions,
        &target.sim_mods,
        &target.map,
    )
    .await?;

    let mut launch = ctx
        .services
        .server
        .request_join_game(target.id, target.password.as_deref())
        .await?;
    tracing::info!(game_id = launch.uid, "Join granted");
    if launch.map.is_none() {
        launch.map = Some(target.map);
    }

    launch_online(&ctx, player, launch, false, None).await
}

pub(super) async fn ladder(
    ctx: Arc<ChainContext>,
    player: WelcomeMessage,
    faction: Faction,
    cancel: CancellationToken,
) -> Result<Launched, SessionError> {
    ensure_executable(&ctx, LADDER_FEATURED_MOD).await?;
    ctx.services
        .mods
        .update_featured_mod(LADDER_FEATURED_MOD, &HashMap::new())
        .await?;

    tracing::info!(faction = faction.as_str(), "Searching for a 1v1 match");
    let mut launch = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            if let Err(e) = ctx.services.server.stop_search_ladder_1v1().await {
                tracing::warn!("Could not stop matchmaker search: {}", e);
            }
            return Err(SessionError::SearchCancelled);
        }
        result = ctx.services.server.start_search_ladder_1v1(faction) => result?,
    };
    check_cancelled(Some(&cancel))?;

    if let Some(ref map) = launch.map {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::SearchCancelled),
            result = ctx.services.maps.ensure_map(map) => result?,
        }
    }
    launch.args = split_merged_args(launch.args);
    launch.rating_mode = RatingMode::Ladder1v1;
    if launch.faction.is_none() {
        launch.faction = Some(faction);
    }

    launch_online(&ctx, player, launch, false, Some(&cancel)).await
}

pub(super) async fn replay(
    ctx: Arc<ChainContext>,
    replay: ReplayGame,
) -> Result<Launched, SessionError> {
    ensure_executable(&ctx, &replay.featured_mod).await?;
    let exit = ctx.processes.start_replay(replay)?;
    Ok(Launched {
        exit,
        kind: SessionKind::Offline,
    })
}

pub(super) async fn offline(
    ctx: Arc<ChainContext>,
    featured_mod: String,
) -> Result<Launched, SessionError> {
    ensure_executable(&ctx, &featured_mod).await?;
    let exit = ctx.processes.start_offline(&featured_mod)?;
    Ok(Launched {
        exit,
        kind: SessionKind::Offline,
    })
}

/// Ask for the executable if this mod has none yet.
async fn ensure_executable(ctx: &ChainContext, featured_mod: &str) -> Result<(), SessionError> {
    if ctx.processes.executable_installed(featured_mod) {
        return Ok(());
    }

    tracing::info!(featured_mod, "Game executable not set, asking the user");
    let path = ctx
        .services
        .paths
        .select_executable(featured_mod)
        .await
        .ok_or_else(|| SessionError::ExecutableNotSelected(featured_mod.to_string()))?;
    ctx.processes.set_executable(featured_mod, &path)?;
    Ok(())
}

async fn prepare_content(
    ctx: &ChainContext,
    featured_mod: &str,
    versions: &HashMap<String, u32>,
    sim_mods: &[String],
    map: &str,
) -> Result<(), SessionError> {
    ctx.services
        .mods
        .update_featured_mod(featured_mod, versions)
        .await?;
    if !sim_mods.is_empty() {
        ctx.services.mods.ensure_sim_mods(sim_mods).await?;
    }
    ctx.services.maps.ensure_map(map).await?;
    Ok(())
}

/// Start relay, replay capture and (optionally) the launch server, then the
/// game. Everything started here is stopped again if a later step fails or
/// the matchmaker search behind `cancel` is abandoned.
async fn launch_online(
    ctx: &ChainContext,
    player: WelcomeMessage,
    launch: GameLaunch,
    rehost: bool,
    cancel: Option<&CancellationToken>,
) -> Result<Launched, SessionError> {
    let game_id = launch.uid;
    let services = &ctx.services;

    let relay_port = services.relay.start(game_id).await?;
    let replay_port = match services.replays.start(game_id).await {
        Ok(port) => port,
        Err(e) => {
            services.relay.stop().await;
            return Err(e.into());
        }
    };
    if let Err(e) = check_cancelled(cancel) {
        stop_online_services(ctx).await;
        return Err(e);
    }

    let launch_server_port = if ctx.launch_server {
        match ctx
            .processes
            .start_launch_server(&launch.featured_mod, game_id)
        {
            Ok(port) => Some(port),
            Err(e) => {
                stop_online_services(ctx).await;
                return Err(e.into());
            }
        }
    } else {
        None
    };
    if let Err(e) = check_cancelled(cancel) {
        rollback(ctx, launch_server_port.is_some()).await;
        return Err(e);
    }

    let started = ctx
        .processes
        .start_game(OnlineGame {
            launch,
            player,
            relay_port,
            replay_port,
            launch_server_port,
            rehost,
        })
        .await;

    match started {
        Ok(exit) if check_cancelled(cancel).is_err() => {
            tracing::info!(game_id, "Search abandoned while the game started, stopping it");
            ctx.processes.kill_game();
            exit.wait().await;
            rollback(ctx, launch_server_port.is_some()).await;
            Err(SessionError::SearchCancelled)
        }
        Ok(exit) => Ok(Launched {
            exit,
            kind: SessionKind::Online { game_id },
        }),
        Err(e) => {
            tracing::warn!(game_id, "Game start failed, stopping auxiliary services");
            rollback(ctx, launch_server_port.is_some()).await;
            Err(e.into())
        }
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<(), SessionError> {
    match cancel {
        Some(cancel) if cancel.is_cancelled() => Err(SessionError::SearchCancelled),
        _ => Ok(()),
    }
}

async fn rollback(ctx: &ChainContext, launch_server: bool) {
    stop_online_services(ctx).await;
    if launch_server {
        ctx.processes.stop_launch_server();
    }
}

async fn stop_online_services(ctx: &ChainContext) {
    ctx.services.replays.stop().await;
    ctx.services.relay.stop().await;
}

/// Report the end of an online game and stop its relay and replay capture.
pub(super) async fn teardown_online(services: &Services, game_id: GameId) {
    if let Err(e) = services.server.notify_game_ended().await {
        tracing::warn!(game_id, "Could not report game end: {}", e);
    }
    services.replays.stop().await;
    services.relay.stop().await;
}

/// The matchmaker sends some switches merged with their value (`"/team 1"`);
/// the game needs them as separate tokens.
pub fn split_merged_args(args: Vec<String>) -> Vec<String> {
    args.into_iter()
        .flat_map(|arg| {
            if arg.starts_with('/') && arg.contains(char::is_whitespace) {
                arg.split_whitespace().map(str::to_string).collect()
            } else {
                vec![arg]
            }
        })
        .collect()
}
