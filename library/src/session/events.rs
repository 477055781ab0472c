//! Session events and subscriptions

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use skirmish_shared::GameId;

/// Capacity of the event channel; slow subscribers skip older events
pub(super) const EVENT_CAPACITY: usize = 256;

/// Something observable changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A server message mentioned a new game
    GameAdded(GameId),
    /// A known game changed (identical snapshots are not reported)
    GameUpdated(GameId),
    /// A game ended and left the registry
    GameRemoved(GameId),
    CurrentGameChanged {
        previous: Option<GameId>,
        current: Option<GameId>,
    },
    /// The game process started or exited
    RunningChanged(bool),
}

/// Event stream with its own cancellation token.
pub struct Subscription {
    rx: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub(super) fn new(rx: broadcast::Receiver<SessionEvent>) -> Self {
        Self {
            rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that ends this subscription when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event; `None` once cancelled or the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.rx.recv() => match result {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
