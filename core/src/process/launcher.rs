//! Process launching and command decoration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use super::{ManagedProcess, ProcessError};
use crate::config::ProcessConfig;

/// Platform decoration applied in front of the command vector
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decoration {
    /// Run the command as-is
    #[default]
    Native,
    /// Prefix with the configured compatibility layer (e.g. `wine`)
    CompatLayer,
    /// Prefix with an elevation command (e.g. `pkexec`), wrapping the
    /// compatibility layer
    Elevated(Vec<String>),
}

/// Everything needed to start one external process
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Name used in logs
    pub name: String,
    /// Program followed by its arguments
    pub command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// TCP console the process will listen on, if any
    pub console: Option<SocketAddr>,
    pub decoration: Decoration,
}

impl SpawnRequest {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            console: None,
            decoration: Decoration::Native,
        }
    }

    pub fn working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn console(mut self, addr: SocketAddr) -> Self {
        self.console = Some(addr);
        self
    }

    pub fn decoration(mut self, decoration: Decoration) -> Self {
        self.decoration = decoration;
        self
    }
}

/// Starts OS processes.
pub trait Launcher: Send + Sync {
    /// Spawn the process and hand it to a supervisor. Must be called from within
    /// a tokio runtime.
    fn launch(&self, request: SpawnRequest) -> Result<ManagedProcess, ProcessError>;
}

/// Default [`Launcher`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    compat_prefix: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(compat_prefix: Vec<String>) -> Self {
        Self { compat_prefix }
    }

    pub fn from_config(config: &ProcessConfig) -> Self {
        Self::new(config.compat_prefix.clone())
    }

    /// Full argv after decoration.
    pub fn command_line(&self, request: &SpawnRequest) -> Vec<String> {
        let (elevation, compat): (&[String], &[String]) = match &request.decoration {
            Decoration::Native => (&[], &[]),
            Decoration::CompatLayer => (&[], &self.compat_prefix),
            Decoration::Elevated(prefix) => (prefix, &self.compat_prefix),
        };
        elevation
            .iter()
            .chain(compat)
            .chain(&request.command)
            .cloned()
            .collect()
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, request: SpawnRequest) -> Result<ManagedProcess, ProcessError> {
        let argv = self.command_line(&request);
        let Some((program, args)) = argv.split_first() else {
            return Err(ProcessError::EmptyCommand(request.name));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = request.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(process = %request.name, "Launching: {:?}", argv);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        Ok(ManagedProcess::supervise(
            request.name,
            child,
            request.console,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(decoration: Decoration) -> SpawnRequest {
        SpawnRequest::new("game", vec!["game.exe".to_string(), "/nomovie".to_string()])
            .decoration(decoration)
    }

    #[test]
    fn test_native_command_is_unchanged() {
        let launcher = ProcessLauncher::new(vec!["wine".to_string()]);
        assert_eq!(
            launcher.command_line(&request(Decoration::Native)),
            vec!["game.exe", "/nomovie"]
        );
    }

    #[test]
    fn test_compat_layer_prefix() {
        let launcher = ProcessLauncher::new(vec!["wine".to_string()]);
        assert_eq!(
            launcher.command_line(&request(Decoration::CompatLayer)),
            vec!["wine", "game.exe", "/nomovie"]
        );
    }

    #[test]
    fn test_elevated_prefix_wraps_compat_layer() {
        let launcher = ProcessLauncher::new(vec!["wine".to_string()]);
        let elevated = Decoration::Elevated(vec!["pkexec".to_string()]);
        assert_eq!(
            launcher.command_line(&request(elevated)),
            vec!["pkexec", "wine", "game.exe", "/nomovie"]
        );
    }

    #[test]
    fn test_elevated_without_compat_layer() {
        let launcher = ProcessLauncher::new(Vec::new());
        let elevated = Decoration::Elevated(vec!["runas".to_string()]);
        assert_eq!(
            launcher.command_line(&request(elevated)),
            vec!["runas", "game.exe", "/nomovie"]
        );
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let launcher = ProcessLauncher::default();
        let result = launcher.launch(SpawnRequest::new("nothing", Vec::new()));
        assert!(matches!(result, Err(ProcessError::EmptyCommand(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let launcher = ProcessLauncher::default();
        let result = launcher.launch(SpawnRequest::new(
            "missing",
            vec!["/no/such/program-skirmish".to_string()],
        ));
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_uses_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessLauncher::default();
        let process = launcher
            .launch(
                SpawnRequest::new(
                    "sh",
                    vec!["sh".to_string(), "-c".to_string(), "touch marker".to_string()],
                )
                .working_dir(Some(dir.path().to_path_buf())),
            )
            .unwrap();

        let outcome = process.exit_watch().wait().await;
        assert_eq!(outcome.code, Some(0));
        assert!(dir.path().join("marker").exists());
    }
}
