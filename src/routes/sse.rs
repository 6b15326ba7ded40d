use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    error::AppError,
    services::{room_service, sse_service},
    state::SharedState,
};

/// Stream the projected view of one room, for projector screens.
pub async fn room_stream(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let observer = room_service::observe(&state, &code).await?;
    info!(room = %code, "new room SSE connection");
    Ok(sse_service::to_sse_stream(observer))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{code}/events", get(room_stream))
}
