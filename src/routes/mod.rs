use axum::Router;

use crate::state::SharedState;

/// Liveness route.
pub mod health;
/// Room lookup routes.
pub mod rooms;
/// Projector event stream route.
pub mod sse;
/// Room socket route.
pub mod websocket;

/// Compose all route trees, wiring in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sse::router())
        .merge(websocket::router())
        .merge(rooms::router())
        .with_state(state)
}
