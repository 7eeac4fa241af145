//! Runner API endpoints
//!
//! Registration, the long-poll claim, heartbeats, and the operator view
//! of the fleet. Everything except register and the fleet listing
//! requires the runner JWT issued at registration.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use ao_core::api::{
    ClaimedRun, DeregisterRequest, HeartbeatRequest, HeartbeatResponse, RegisterRunnerRequest,
    RegisterRunnerResponse, RunnerSummary,
};
use ao_core::run::ClaimFilter;

use crate::auth::{authenticate_runner, issue_runner_jwt};
use crate::routes::{core_error, forbidden, route_error, unauthorized, RouteError};
use crate::state::AppState;

const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 25;
const MAX_CLAIM_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimQuery {
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    require_tagged: Option<bool>,
}

/// POST /runner/register - Register (or reconnect) a runner
///
/// Idempotent: a runner re-registering under its derived id replaces its
/// previous record and gets a fresh token.
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRunnerRequest>,
) -> Result<Json<RegisterRunnerResponse>, RouteError> {
    let (info, _created) = state.registry().register(&req).await.map_err(core_error)?;
    let token = issue_runner_jwt(&info.runner_id)
        .map_err(|e| route_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    Ok(Json(RegisterRunnerResponse {
        runner: RunnerSummary::from(&info),
        token,
    }))
}

/// GET /runner/runs - Long-poll for the next claimable run
///
/// Returns 200 with the claimed run, or 204 when the poll window closes
/// empty. An unknown runner id gets 404 so the runner re-registers.
async fn claim_run(
    State(state): State<AppState>,
    Query(query): Query<ClaimQuery>,
    headers: HeaderMap,
) -> Result<Response, RouteError> {
    let claims = authenticate_runner(&headers).map_err(unauthorized)?;

    // The poll doubles as liveness; this also 404s runners the sweeper
    // removed, which sends them back through register.
    let info = state
        .registry()
        .heartbeat(&claims.sub)
        .await
        .map_err(core_error)?;

    let timeout = query
        .timeout_secs
        .unwrap_or(DEFAULT_CLAIM_TIMEOUT_SECS)
        .min(MAX_CLAIM_TIMEOUT_SECS);
    let filter = ClaimFilter::new(&claims.sub, info.tags)
        .require_tagged(query.require_tagged.unwrap_or(false));

    let claimed = state
        .queue()
        .claim(&filter, Duration::from_secs(timeout))
        .await
        .map_err(core_error)?;

    match claimed {
        Some(run) => Ok(Json(ClaimedRun::from(&run)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /runner/heartbeat - Liveness ping; the response carries stop signals
async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, RouteError> {
    let claims = authenticate_runner(&headers).map_err(unauthorized)?;
    if req.runner_id != claims.sub {
        return Err(forbidden(format!(
            "Token was issued to {}, not {}",
            claims.sub, req.runner_id
        )));
    }

    state
        .registry()
        .heartbeat(&claims.sub)
        .await
        .map_err(core_error)?;
    let stop_run_ids = state
        .queue()
        .pending_stops(&claims.sub)
        .await
        .map_err(core_error)?;

    Ok(Json(HeartbeatResponse { stop_run_ids }))
}

/// POST /runner/deregister - Graceful shutdown removes the record
async fn deregister(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeregisterRequest>,
) -> Result<StatusCode, RouteError> {
    let claims = authenticate_runner(&headers).map_err(unauthorized)?;
    if req.runner_id != claims.sub {
        return Err(forbidden(format!(
            "Token was issued to {}, not {}",
            claims.sub, req.runner_id
        )));
    }

    state
        .registry()
        .deregister(&claims.sub)
        .await
        .map_err(core_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /runners - List the runner fleet
async fn list_runners(
    State(state): State<AppState>,
) -> Result<Json<Vec<RunnerSummary>>, RouteError> {
    let runners = state.registry().list().await.map_err(core_error)?;
    Ok(Json(runners.iter().map(RunnerSummary::from).collect()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runner/register", post(register))
        .route("/runner/runs", get(claim_run))
        .route("/runner/heartbeat", post(heartbeat))
        .route("/runner/deregister", post(deregister))
        .route("/runners", get(list_runners))
}
