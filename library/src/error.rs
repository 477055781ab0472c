//! Session errors

use thiserror::Error;

use skirmish_shared::GameId;

use crate::orchestrator::OrchestratorError;
use crate::services::ServiceError;

/// Errors returned by the [`GameSessionCoordinator`](crate::session::GameSessionCoordinator) API
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a game is already running")]
    AlreadyRunning,
    #[error("another game is being launched")]
    LaunchInProgress,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unknown game {0}")]
    UnknownGame(GameId),
    #[error("no game executable selected for featured mod '{0}'")]
    ExecutableNotSelected(String),
    #[error("matchmaker search was cancelled")]
    SearchCancelled,
    #[error("no game to rehost")]
    NothingToRehost,
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("game session has shut down")]
    Closed,
}

impl SessionError {
    /// Whether the user should be told about this failure.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::SearchCancelled | Self::Closed)
    }
}
