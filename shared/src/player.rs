//! Player info pushed by the server

use serde::{Deserialize, Serialize};

use crate::game::GameId;

/// What a player is doing, from the server's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Hosting,
    Joining,
    Playing,
    /// Also any status this client does not know
    #[default]
    #[serde(other)]
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: u32,
    pub login: String,
    /// Game the server believes this player is in
    #[serde(default)]
    pub game_id: Option<GameId>,
    #[serde(default)]
    pub status: PlayerStatus,
}

/// Playable faction, passed to the game as a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Uef,
    Aeon,
    Cybran,
    Seraphim,
    Random,
}

impl Faction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uef => "uef",
            Self::Aeon => "aeon",
            Self::Cybran => "cybran",
            Self::Seraphim => "seraphim",
            Self::Random => "random",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uef" => Some(Self::Uef),
            "aeon" => Some(Self::Aeon),
            "cybran" => Some(Self::Cybran),
            "seraphim" => Some(Self::Seraphim),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}
