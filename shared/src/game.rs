//! Game records and the server's game-info snapshot

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Server-assigned game identifier
pub type GameId = u32;

/// Lifecycle of a game as reported by the server.
///
/// `Unknown → Staging → Battleroom → Playing → Ended`. Only the server moves a
/// game through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Host is setting the game up
    Staging,
    /// Players are being assigned to teams before launch
    Battleroom,
    /// Game is in progress
    Playing,
    /// Game is over (terminal)
    Ended,
    /// Not reported yet, or a value this client does not know. Ordered by
    /// [`rank`](Self::rank), not by declaration.
    #[default]
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    /// Position in the lifecycle, used to detect regressions.
    pub fn rank(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Staging => 1,
            Self::Battleroom => 2,
            Self::Playing => 3,
            Self::Ended => 4,
        }
    }

    /// Games that can still be joined.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Staging | Self::Battleroom)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Ended
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Staging => "staging",
            Self::Battleroom => "battleroom",
            Self::Playing => "playing",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one game pushed by the server.
///
/// The server always sends the complete state of the game, so maps in here
/// replace (not patch) the local copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfoMessage {
    pub uid: GameId,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "mapname")]
    pub map: String,
    #[serde(default)]
    pub featured_mod: String,
    /// Featured mod component → file version
    #[serde(default)]
    pub featured_mod_versions: HashMap<String, u32>,
    /// Sim mod uid → display name
    #[serde(default)]
    pub sim_mods: HashMap<String, String>,
    /// Team id → ordered player names
    #[serde(default)]
    pub teams: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub num_players: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub state: GameStatus,
    #[serde(default)]
    pub password_protected: bool,
    #[serde(default)]
    pub rating_min: Option<i32>,
    #[serde(default)]
    pub rating_max: Option<i32>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    /// Unix timestamp (seconds) at which the game was launched
    #[serde(default)]
    pub launched_at: Option<f64>,
}

impl GameInfoMessage {
    /// Minimal message for a game id and status; the remaining fields are empty.
    pub fn new(uid: GameId, state: GameStatus) -> Self {
        Self {
            uid,
            host: String::new(),
            title: String::new(),
            map: String::new(),
            featured_mod: String::new(),
            featured_mod_versions: HashMap::new(),
            sim_mods: HashMap::new(),
            teams: HashMap::new(),
            num_players: 0,
            max_players: 0,
            state,
            password_protected: false,
            rating_min: None,
            rating_max: None,
            average_rating: None,
            launched_at: None,
        }
    }
}

/// Local view of a game, kept up to date from [`GameInfoMessage`]s.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRecord {
    id: GameId,
    pub host: String,
    pub title: String,
    pub status: GameStatus,
    pub map: String,
    pub featured_mod: String,
    pub featured_mod_versions: HashMap<String, u32>,
    pub sim_mods: HashMap<String, String>,
    pub teams: HashMap<String, Vec<String>>,
    pub num_players: u32,
    pub max_players: u32,
    pub password_protected: bool,
    pub rating_min: Option<i32>,
    pub rating_max: Option<i32>,
    pub average_rating: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    /// Password used to join, kept for rehosting. Never leaves the client.
    #[serde(skip)]
    pub password: Option<String>,
}

impl GameRecord {
    /// Create a record from the first message that mentions a game.
    pub fn from_message(message: &GameInfoMessage) -> Self {
        let mut record = Self {
            id: message.uid,
            host: String::new(),
            title: String::new(),
            status: GameStatus::Unknown,
            map: String::new(),
            featured_mod: String::new(),
            featured_mod_versions: HashMap::new(),
            sim_mods: HashMap::new(),
            teams: HashMap::new(),
            num_players: 0,
            max_players: 0,
            password_protected: false,
            rating_min: None,
            rating_max: None,
            average_rating: None,
            started_at: None,
            password: None,
        };
        record.apply(message);
        record
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    /// Copy a server snapshot into this record in place.
    ///
    /// Returns `true` if anything changed. The id never changes; messages for
    /// another id are ignored.
    pub fn apply(&mut self, message: &GameInfoMessage) -> bool {
        if message.uid != self.id {
            tracing::warn!(
                record = self.id,
                message = message.uid,
                "Ignoring game info for a different game"
            );
            return false;
        }

        let before = self.clone();

        self.host.clone_from(&message.host);
        self.title.clone_from(&message.title);
        self.status = message.state;
        self.map.clone_from(&message.map);
        self.featured_mod.clone_from(&message.featured_mod);
        replace_map(&mut self.featured_mod_versions, &message.featured_mod_versions);
        replace_map(&mut self.sim_mods, &message.sim_mods);
        replace_map(&mut self.teams, &message.teams);
        self.num_players = message.num_players;
        self.max_players = message.max_players;
        self.password_protected = message.password_protected;
        self.rating_min = message.rating_min;
        self.rating_max = message.rating_max;
        self.average_rating = message.average_rating;
        self.started_at = message.launched_at.and_then(timestamp_to_datetime);

        *self != before
    }

    /// All player names across teams, in team-id order.
    pub fn players(&self) -> Vec<&str> {
        let mut team_ids: Vec<&String> = self.teams.keys().collect();
        team_ids.sort();
        team_ids
            .into_iter()
            .flat_map(|team| self.teams[team].iter().map(String::as_str))
            .collect()
    }
}

/// Clear and refill; the server snapshot is complete, never a delta.
fn replace_map<V: Clone>(target: &mut HashMap<String, V>, source: &HashMap<String, V>) {
    target.clear();
    target.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
}

fn timestamp_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1_000_000_000.0) as u32;
    DateTime::from_timestamp(whole, nanos)
}

/// Who may see a hosted game in the lobby list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameVisibility {
    #[default]
    Public,
    Friends,
}

/// Parameters for hosting a game (and for rehosting one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGame {
    pub title: String,
    #[serde(default)]
    pub password: Option<String>,
    pub featured_mod: String,
    #[serde(rename = "mapname")]
    pub map: String,
    /// Sim mod uids
    #[serde(default)]
    pub sim_mods: BTreeSet<String>,
    #[serde(default)]
    pub visibility: GameVisibility,
    #[serde(default)]
    pub rating_min: Option<i32>,
    #[serde(default)]
    pub rating_max: Option<i32>,
}

impl NewGame {
    /// Same title, password, map and mods as an existing game.
    pub fn from_record(record: &GameRecord) -> Self {
        Self {
            title: record.title.clone(),
            password: record.password.clone(),
            featured_mod: record.featured_mod.clone(),
            map: record.map.clone(),
            sim_mods: record.sim_mods.keys().cloned().collect(),
            visibility: GameVisibility::Public,
            rating_min: record.rating_min,
            rating_max: record.rating_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(uid: GameId, state: GameStatus) -> GameInfoMessage {
        let mut msg = GameInfoMessage::new(uid, state);
        msg.title = "4v4 no rush".to_string();
        msg.map = "scmp_009".to_string();
        msg.featured_mod = "faf".to_string();
        msg
    }

    #[test]
    fn test_status_decodes_unknown_values() {
        let status: GameStatus = serde_json::from_str("\"lobby_v2\"").unwrap();
        assert_eq!(status, GameStatus::Unknown);
        let status: GameStatus = serde_json::from_str("\"battleroom\"").unwrap();
        assert_eq!(status, GameStatus::Battleroom);
    }

    #[test]
    fn test_status_ranks_are_ordered() {
        let order = [
            GameStatus::Unknown,
            GameStatus::Staging,
            GameStatus::Battleroom,
            GameStatus::Playing,
            GameStatus::Ended,
        ];
        assert!(order.windows(2).all(|w| w[0].rank() < w[1].rank()));
        assert!(GameStatus::Staging.is_open());
        assert!(!GameStatus::Playing.is_open());
        assert!(GameStatus::Ended.is_terminal());
    }

    #[test]
    fn test_apply_replaces_teams() {
        let mut first = message(5, GameStatus::Battleroom);
        first
            .teams
            .insert("1".to_string(), vec!["alice".to_string(), "bob".to_string()]);
        first.teams.insert("2".to_string(), vec!["carol".to_string()]);
        let mut record = GameRecord::from_message(&first);

        let mut second = message(5, GameStatus::Battleroom);
        second.teams.insert("1".to_string(), vec!["alice".to_string()]);
        assert!(record.apply(&second));

        assert_eq!(record.teams.len(), 1);
        assert_eq!(record.teams["1"], vec!["alice".to_string()]);
    }

    #[test]
    fn test_apply_identical_message_is_noop() {
        let msg = message(9, GameStatus::Staging);
        let mut record = GameRecord::from_message(&msg);
        assert!(!record.apply(&msg));
    }

    #[test]
    fn test_apply_ignores_other_ids() {
        let mut record = GameRecord::from_message(&message(1, GameStatus::Staging));
        assert!(!record.apply(&message(2, GameStatus::Playing)));
        assert_eq!(record.id(), 1);
        assert_eq!(record.status, GameStatus::Staging);
    }

    #[test]
    fn test_apply_keeps_local_password() {
        let mut record = GameRecord::from_message(&message(3, GameStatus::Staging));
        record.password = Some("hunter2".to_string());
        record.apply(&message(3, GameStatus::Battleroom));
        assert_eq!(record.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_launched_at_becomes_start_time() {
        let mut msg = message(4, GameStatus::Playing);
        msg.launched_at = Some(1_700_000_000.5);
        let record = GameRecord::from_message(&msg);
        let started = record.started_at.unwrap();
        assert_eq!(started.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_players_in_team_order() {
        let mut msg = message(6, GameStatus::Battleroom);
        msg.teams.insert("2".to_string(), vec!["zed".to_string()]);
        msg.teams
            .insert("1".to_string(), vec!["amy".to_string(), "ben".to_string()]);
        let record = GameRecord::from_message(&msg);
        assert_eq!(record.players(), vec!["amy", "ben", "zed"]);
    }

    #[test]
    fn test_new_game_from_record() {
        let mut msg = message(8, GameStatus::Battleroom);
        msg.sim_mods
            .insert("uid-1".to_string(), "Supreme Economy".to_string());
        let mut record = GameRecord::from_message(&msg);
        record.password = Some("pw".to_string());

        let game = NewGame::from_record(&record);
        assert_eq!(game.title, "4v4 no rush");
        assert_eq!(game.password.as_deref(), Some("pw"));
        assert_eq!(game.map, "scmp_009");
        assert!(game.sim_mods.contains("uid-1"));
    }

    #[test]
    fn test_record_serialization_skips_password() {
        let mut record = GameRecord::from_message(&message(2, GameStatus::Staging));
        record.password = Some("secret".to_string());
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("secret"));
    }
}
