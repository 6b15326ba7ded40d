//! Read-only access to rooms for HTTP surfaces.

use crate::{
    dto::rooms::LeaderboardResponse,
    error::ServiceError,
    services::{leaderboard, projection::RoomObserver},
    session::room::RoomCode,
    state::SharedState,
};

/// Start following the room behind `code` on a fresh store connection.
pub async fn observe(state: &SharedState, code: &str) -> Result<RoomObserver, ServiceError> {
    let code: RoomCode = code.parse()?;
    let reader = state.registry().observe_room(state.connect(), &code).await?;
    Ok(RoomObserver::spawn(reader))
}

/// Current leaderboard of the room behind `code`.
pub async fn leaderboard(state: &SharedState, code: &str) -> Result<LeaderboardResponse, ServiceError> {
    let code: RoomCode = code.parse()?;
    let reader = state.registry().observe_room(state.connect(), &code).await?;
    let room = reader.snapshot().await?;

    Ok(LeaderboardResponse {
        room: code.to_string(),
        status: room.game_state.map(|state| state.status),
        rows: leaderboard::compute(&room.players, &room.scores),
    })
}
