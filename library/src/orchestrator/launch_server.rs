//! Launch server helper
//!
//! The legacy game asks a small helper for process spawns it cannot do itself.
//! The helper may run elevated, so it is supervised over TCP rather than through
//! its exit status.

use std::net::{Ipv4Addr, SocketAddr};

use skirmish_core::config::LaunchServerConfig;
use skirmish_core::keepalive::{KeepAlivePolicy, KeepAliveSupervisor, TcpProbe};
use skirmish_core::process::{Decoration, Launcher, ManagedProcess, SpawnRequest};
use skirmish_shared::GameId;

use super::OrchestratorError;

pub(super) struct LaunchServer {
    process: ManagedProcess,
    keep_alive: KeepAliveSupervisor,
    port: u16,
    elevated: bool,
}

impl LaunchServer {
    /// Spawn the helper on `port` and start probing it.
    pub(super) fn spawn(
        launcher: &dyn Launcher,
        settings: &LaunchServerConfig,
        policy: KeepAlivePolicy,
        port: u16,
        featured_mod: &str,
        game_id: GameId,
    ) -> Result<Self, OrchestratorError> {
        let executable = settings
            .executable
            .as_ref()
            .ok_or(OrchestratorError::LaunchServerNotConfigured)?;

        let command = vec![
            executable.display().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--mod".to_string(),
            featured_mod.to_string(),
            "--uid".to_string(),
            game_id.to_string(),
        ];
        let decoration = if settings.elevate {
            Decoration::Elevated(settings.elevation_prefix.clone())
        } else {
            Decoration::CompatLayer
        };

        let process = launcher.launch(
            SpawnRequest::new("launch-server", command)
                .working_dir(executable.parent().map(|dir| dir.to_path_buf()))
                .decoration(decoration),
        )?;

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let keep_alive = KeepAliveSupervisor::start(
            TcpProbe::new(addr, policy.probe_timeout),
            policy,
            process.kill_handle(),
        );

        tracing::info!(
            port,
            featured_mod,
            game_id,
            elevated = settings.elevate,
            "Launch server started"
        );

        Ok(Self {
            process,
            keep_alive,
            port,
            elevated: settings.elevate,
        })
    }

    pub(super) fn port(&self) -> u16 {
        self.port
    }

    /// Alive, within its retry budget and started with the wanted elevation.
    pub(super) fn is_reusable(&self, elevate: bool) -> bool {
        self.process.is_alive() && self.keep_alive.is_within_budget() && self.elevated == elevate
    }

    pub(super) fn stop(self) {
        tracing::info!(port = self.port, "Stopping launch server");
        self.keep_alive.stop();
        self.process.kill();
    }
}
