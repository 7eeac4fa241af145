//! Session API endpoints
//!
//! Bind, event ingestion, and metadata patches are runner-only; they are
//! forwarded here by the runner's gateway on behalf of executors. Session
//! listing and the event log are operator surfaces.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use ao_core::api::{BindSessionRequest, SessionEventRequest, SessionResponse};
use ao_core::session::SessionEvent;
use ao_core::Error;

use crate::auth::authenticate_runner;
use crate::routes::{core_error, unauthorized, RouteError};
use crate::state::AppState;

/// GET /sessions - List all sessions
async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionResponse>>, RouteError> {
    let sessions = state.sessions().list().await.map_err(core_error)?;
    Ok(Json(sessions.iter().map(SessionResponse::from).collect()))
}

/// GET /sessions/{id} - Get a single session
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, RouteError> {
    let session = state
        .sessions()
        .get(id)
        .await
        .map_err(core_error)?
        .ok_or_else(|| core_error(Error::SessionNotFound(id.to_string())))?;
    Ok(Json(SessionResponse::from(&session)))
}

/// POST /sessions/{id}/bind - Attach the executor-native session id
///
/// Write-once: rebinding with the same id is a no-op, a different id is
/// rejected.
async fn bind_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<BindSessionRequest>,
) -> Result<Json<SessionResponse>, RouteError> {
    authenticate_runner(&headers).map_err(unauthorized)?;

    let session = state
        .sessions()
        .update(id, |s| {
            s.bind(&req.executor_session_id, req.executor_type, req.hostname)
        })
        .await
        .map_err(core_error)?;

    Ok(Json(SessionResponse::from(&session)))
}

/// POST /sessions/{id}/events - Append to the session's event log
async fn append_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<SessionEventRequest>,
) -> Result<StatusCode, RouteError> {
    authenticate_runner(&headers).map_err(unauthorized)?;

    let event = SessionEvent::new(req.event_type, req.data);
    state
        .sessions()
        .append_event(id, &event)
        .await
        .map_err(core_error)?;

    Ok(StatusCode::ACCEPTED)
}

/// GET /sessions/{id}/events - Read the session's event log
async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<SessionEvent>>, RouteError> {
    if state.sessions().get(id).await.map_err(core_error)?.is_none() {
        return Err(core_error(Error::SessionNotFound(id.to_string())));
    }
    let events = state.sessions().events(id).await.map_err(core_error)?;
    Ok(Json(events))
}

/// PATCH /sessions/{id}/metadata - Shallow-merge metadata keys
async fn patch_metadata(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<SessionResponse>, RouteError> {
    authenticate_runner(&headers).map_err(unauthorized)?;

    let session = state
        .sessions()
        .update(id, |s| {
            s.patch_metadata(patch);
            Ok(())
        })
        .await
        .map_err(core_error)?;

    Ok(Json(SessionResponse::from(&session)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/bind", post(bind_session))
        .route(
            "/sessions/{id}/events",
            get(list_events).post(append_event),
        )
        .route("/sessions/{id}/metadata", patch(patch_metadata))
}
