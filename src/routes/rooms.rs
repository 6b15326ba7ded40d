use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::rooms::LeaderboardResponse, error::AppError, services::room_service,
    state::SharedState,
};

/// Return the current leaderboard of a room.
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let board = room_service::leaderboard(&state, &code).await?;
    Ok(Json(board))
}

/// Configure the room routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{code}/leaderboard", get(leaderboard))
}
