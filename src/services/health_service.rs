use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness along with a few load figures.
pub fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse::ok(state.registry().len(), state.store().connection_count())
}
