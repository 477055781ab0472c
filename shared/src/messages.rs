//! Messages exchanged with the lobby server
//!
//! Inbound messages are JSON objects tagged by their `command` field:
//!
//! ```text
//! {"command": "game_info", "uid": 5, "state": "staging", ...}
//! {"command": "player_info", "id": 3, "login": "alice", "game_id": 5, ...}
//! {"command": "welcome", "id": 3, "login": "alice"}
//! ```

use serde::{Deserialize, Serialize};

use crate::game::{GameId, GameInfoMessage};
use crate::player::{Faction, PlayerInfo};

/// Messages pushed by the server that the session layer reacts to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full snapshot of one game
    GameInfo(GameInfoMessage),
    /// Status of a player (the local player included)
    PlayerInfo(PlayerInfo),
    /// Login accepted (also sent again after a reconnect)
    Welcome(WelcomeMessage),
}

/// The local player as the server sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub id: u32,
    pub login: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub clan: Option<String>,
    /// Global rating as (mean, deviation)
    #[serde(default)]
    pub rating: Option<(f64, f64)>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub subdivision: Option<String>,
}

impl WelcomeMessage {
    pub fn new(id: u32, login: impl Into<String>) -> Self {
        Self {
            id,
            login: login.into(),
            country: None,
            clan: None,
            rating: None,
            division: None,
            subdivision: None,
        }
    }
}

/// How the result of a game is rated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingMode {
    #[default]
    Global,
    #[serde(rename = "ladder_1v1")]
    Ladder1v1,
    None,
}

impl RatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Ladder1v1 => "ladder_1v1",
            Self::None => "none",
        }
    }
}

/// Server grant to start the game process (host, join or matchmaker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLaunch {
    pub uid: GameId,
    #[serde(rename = "mod")]
    pub featured_mod: String,
    /// Extra switches chosen by the server
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, rename = "mapname")]
    pub map: Option<String>,
    #[serde(default)]
    pub expected_players: Option<u32>,
    #[serde(default)]
    pub team: Option<u32>,
    #[serde(default)]
    pub map_position: Option<u32>,
    #[serde(default)]
    pub faction: Option<Faction>,
    #[serde(default)]
    pub rating_mode: RatingMode,
}

impl GameLaunch {
    pub fn new(uid: GameId, featured_mod: impl Into<String>) -> Self {
        Self {
            uid,
            featured_mod: featured_mod.into(),
            args: Vec::new(),
            map: None,
            expected_players: None,
            team: None,
            map_position: None,
            faction: None,
            rating_mode: RatingMode::Global,
        }
    }
}
