//! Game registry
//!
//! Each record lives in its own watch channel. The owner thread holds the
//! senders and mutates records in place; readers hold [`GameRef`]s that keep
//! observing those updates until the game is removed.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use tokio::sync::watch;

use skirmish_shared::{GameId, GameInfoMessage, GameRecord, GameStatus};

/// Live read-only view of one game.
#[derive(Debug, Clone)]
pub struct GameRef(watch::Receiver<GameRecord>);

impl GameRef {
    pub fn id(&self) -> GameId {
        self.0.borrow().id()
    }

    /// Snapshot of the record.
    pub fn get(&self) -> GameRecord {
        self.0.borrow().clone()
    }

    pub fn status(&self) -> GameStatus {
        self.0.borrow().status
    }

    /// Removed from the registry. The last state stays readable.
    pub fn is_removed(&self) -> bool {
        self.0.has_changed().is_err()
    }

    /// Wait for the next update. Returns `false` once the game was removed.
    pub async fn changed(&mut self) -> bool {
        self.0.changed().await.is_ok()
    }
}

/// Published set of known games
pub type GameIndex = BTreeMap<GameId, GameRef>;

/// What applying a message did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Applied {
    Added,
    Updated { previous: GameStatus },
    Unchanged,
    Removed,
    /// Terminal message for a game we never saw
    Ignored,
}

pub(super) struct Registry {
    records: HashMap<GameId, watch::Sender<GameRecord>>,
    index: watch::Sender<GameIndex>,
}

impl Registry {
    pub(super) fn new() -> (Self, watch::Receiver<GameIndex>) {
        let (index, index_rx) = watch::channel(GameIndex::new());
        let registry = Self {
            records: HashMap::new(),
            index,
        };
        (registry, index_rx)
    }

    pub(super) fn apply(&mut self, message: &GameInfoMessage) -> Applied {
        let id = message.uid;
        let Some(record) = self.records.get(&id) else {
            if message.state.is_terminal() {
                return Applied::Ignored;
            }
            let (tx, rx) = watch::channel(GameRecord::from_message(message));
            self.records.insert(id, tx);
            self.index.send_modify(|index| {
                index.insert(id, GameRef(rx));
            });
            return Applied::Added;
        };

        let previous = record.borrow().status;
        if message.state.rank() < previous.rank() {
            tracing::warn!(
                game_id = id,
                from = %previous,
                to = %message.state,
                "Game status went backwards"
            );
        }
        let changed = record.send_if_modified(|record| record.apply(message));

        if message.state.is_terminal() {
            self.records.remove(&id);
            self.index.send_modify(|index| {
                index.remove(&id);
            });
            Applied::Removed
        } else if changed {
            Applied::Updated { previous }
        } else {
            Applied::Unchanged
        }
    }

    pub(super) fn get(&self, id: GameId) -> Option<GameRecord> {
        self.records.get(&id).map(|record| record.borrow().clone())
    }

    pub(super) fn status(&self, id: GameId) -> Option<GameStatus> {
        self.records.get(&id).map(|record| record.borrow().status)
    }

    /// Remember the password used to join, for rehosting.
    pub(super) fn set_password(&mut self, id: GameId, password: Option<String>) {
        if let Some(record) = self.records.get(&id) {
            record.send_if_modified(|record| {
                let changed = record.password != password;
                record.password = password;
                changed
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: GameId, state: GameStatus) -> GameInfoMessage {
        GameInfoMessage::new(id, state)
    }

    #[test]
    fn test_add_then_update_in_place() {
        let (mut registry, index) = Registry::new();
        assert_eq!(registry.apply(&message(5, GameStatus::Staging)), Applied::Added);

        let held = index.borrow().get(&5).cloned().unwrap();
        let mut update = message(5, GameStatus::Battleroom);
        update.teams = [("1".to_string(), vec!["alice".to_string()])]
            .into_iter()
            .collect();
        assert_eq!(
            registry.apply(&update),
            Applied::Updated {
                previous: GameStatus::Staging
            }
        );

        // The reference taken before the update sees it.
        assert_eq!(held.status(), GameStatus::Battleroom);
        assert_eq!(held.get().teams["1"], vec!["alice".to_string()]);
        assert_eq!(index.borrow().len(), 1);
    }

    #[test]
    fn test_identical_message_is_unchanged() {
        let (mut registry, _index) = Registry::new();
        registry.apply(&message(1, GameStatus::Staging));
        assert_eq!(registry.apply(&message(1, GameStatus::Staging)), Applied::Unchanged);
    }

    #[test]
    fn test_terminal_removes_and_closes_refs() {
        let (mut registry, index) = Registry::new();
        registry.apply(&message(2, GameStatus::Playing));
        let held = index.borrow().get(&2).cloned().unwrap();

        assert_eq!(registry.apply(&message(2, GameStatus::Ended)), Applied::Removed);
        assert!(index.borrow().is_empty());
        assert!(registry.get(2).is_none());
        assert!(held.is_removed());
        assert_eq!(held.status(), GameStatus::Ended);
    }

    #[test]
    fn test_terminal_for_unseen_game_is_ignored() {
        let (mut registry, index) = Registry::new();
        assert_eq!(registry.apply(&message(7, GameStatus::Ended)), Applied::Ignored);
        assert!(index.borrow().is_empty());
    }

    #[test]
    fn test_last_status_wins() {
        let (mut registry, _index) = Registry::new();
        registry.apply(&message(3, GameStatus::Playing));
        registry.apply(&message(3, GameStatus::Staging));
        assert_eq!(registry.status(3), Some(GameStatus::Staging));
    }

    #[test]
    fn test_password_is_kept_across_updates() {
        let (mut registry, _index) = Registry::new();
        registry.apply(&message(4, GameStatus::Staging));
        registry.set_password(4, Some("hunter2".to_string()));
        registry.apply(&message(4, GameStatus::Battleroom));
        assert_eq!(registry.get(4).unwrap().password.as_deref(), Some("hunter2"));
    }
}
