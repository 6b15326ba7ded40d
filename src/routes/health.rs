use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::health::HealthResponse, services::health_service, state::SharedState};

/// Liveness probe.
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(health_service::health_status(&state))
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/health", get(health))
}
