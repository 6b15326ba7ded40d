use serde::Serialize;

use crate::{services::leaderboard::LeaderboardRow, session::model::SessionStatus};

/// Payload of `GET /rooms/{code}/leaderboard`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    /// Room code.
    pub room: String,
    /// Current status, if the room has a session.
    pub status: Option<SessionStatus>,
    /// Ranked online players.
    pub rows: Vec<LeaderboardRow>,
}
