//! Run API endpoints
//!
//! Enqueue, inspect, report, and stop runs. Status reports are a
//! runner-only surface; the rest is operator-facing.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use ao_core::api::{EnqueueRunRequest, EnqueueRunResponse, ReportStatusRequest};
use ao_core::run::{Run, RunSpec, RunSummary};

use crate::auth::authenticate_runner;
use crate::routes::{core_error, unauthorized, RouteError};
use crate::state::AppState;

/// POST /runs - Enqueue a run
async fn enqueue_run(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRunRequest>,
) -> Result<(StatusCode, Json<EnqueueRunResponse>), RouteError> {
    let spec = RunSpec::from(req);
    let run = state.queue().enqueue(spec).await.map_err(core_error)?;

    Ok((
        StatusCode::CREATED,
        Json(EnqueueRunResponse {
            run_id: run.id,
            session_id: run.session_id,
        }),
    ))
}

/// GET /runs - List all runs
async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunSummary>>, RouteError> {
    let runs = state.queue().list_runs().await.map_err(core_error)?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /runs/{id} - Full stored record, scope included
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Run>, RouteError> {
    let run = state.queue().get_run(id).await.map_err(core_error)?;
    Ok(Json(run))
}

/// POST /runs/{id}/status - Runner reports a run transition
async fn report_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ReportStatusRequest>,
) -> Result<Json<RunSummary>, RouteError> {
    let claims = authenticate_runner(&headers).map_err(unauthorized)?;

    let (run, _outcome) = state
        .queue()
        .report_status(id, &claims.sub, req.status.into(), req.error, req.result)
        .await
        .map_err(core_error)?;

    Ok(Json(RunSummary::from(&run)))
}

/// POST /runs/{id}/stop - Request a stop; stopping a finished run is a no-op
async fn stop_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunSummary>, RouteError> {
    let run = state.queue().request_stop(id).await.map_err(core_error)?;
    Ok(Json(RunSummary::from(&run)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runs", get(list_runs).post(enqueue_run))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/status", post(report_status))
        .route("/runs/{id}/stop", post(stop_run))
}
