//! Agent blueprint listing

use axum::{extract::State, routing::get, Json, Router};

use ao_core::api::AgentSummary;

use crate::routes::{core_error, RouteError};
use crate::state::AppState;

/// GET /agents - List available agent blueprints
async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentSummary>>, RouteError> {
    let agents = state.agents().list().await.map_err(core_error)?;
    Ok(Json(agents))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/agents", get(list_agents))
}
