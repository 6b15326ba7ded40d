use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{error::ServiceError, store::StorePath};

const ROOMS_ROOT: &str = "rooms";
const ROOM_CODE_MIN: u32 = 100_000;
const ROOM_CODE_MAX: u32 = 999_999;

/// Six digit code identifying a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Draw a code uniformly from 100000..=999999.
    pub fn generate() -> Self {
        let value = rand::rng().random_range(ROOM_CODE_MIN..=ROOM_CODE_MAX);
        Self(value.to_string())
    }

    /// The code as shown to players.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Root of the room subtree.
    pub fn root(&self) -> StorePath {
        StorePath::root().child(ROOMS_ROOT).child(self.0.clone())
    }

    /// Controller-owned `gameState` node.
    pub fn game_state(&self) -> StorePath {
        self.root().child("gameState")
    }

    /// Presence records.
    pub fn players(&self) -> StorePath {
        self.root().child("players")
    }

    /// Presence record of one player.
    pub fn player(&self, player_id: &str) -> StorePath {
        self.players().child(player_id)
    }

    /// Score ledger.
    pub fn scores(&self) -> StorePath {
        self.root().child("scores")
    }

    /// Ledger entry of one player.
    pub fn score(&self, player_id: &str) -> StorePath {
        self.scores().child(player_id)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let valid = trimmed.len() == 6
            && trimmed.chars().all(|c| c.is_ascii_digit())
            && !trimmed.starts_with('0');
        if valid {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(ServiceError::InvalidInput(format!(
                "room code `{raw}` must be six digits"
            )))
        }
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomCode> for String {
    fn from(value: RoomCode) -> Self {
        value.0
    }
}

/// Player ids double as store keys, so they share the key restrictions.
pub fn validate_player_id(player_id: &str) -> Result<(), ServiceError> {
    let valid = !player_id.is_empty()
        && player_id.len() <= 64
        && player_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "player id `{player_id}` must be 1-64 characters of [A-Za-z0-9_-]"
        )))
    }
}
