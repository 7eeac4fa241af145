//! Session gateway
//!
//! A localhost HTTP surface for executors. They get this address as
//! their orchestrator URL and never see the coordinator or the runner's
//! credentials; the gateway relays session calls upstream with the
//! runner's token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::error;
use uuid::Uuid;

use ao_core::api::{BindSessionRequest, ErrorResponse, SessionEventRequest};

use crate::client::CoordinatorApi;
use crate::error::RunnerError;

#[derive(Clone)]
pub struct GatewayState {
    pub client: Arc<dyn CoordinatorApi>,
    pub hostname: String,
    pub executor_type: String,
}

pub(crate) type RelayError = (StatusCode, Json<ErrorResponse>);

/// Upstream rejections keep their status; transport problems surface
/// as 502 so the executor can tell the difference.
fn relay_error(err: RunnerError) -> RelayError {
    let status = match &err {
        RunnerError::Api {
            status: Some(code), ..
        } => StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY),
        _ => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// What executors send to bind; the gateway fills in the runner's
/// executor type and hostname before forwarding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBindRequest {
    pub executor_session_id: String,
}

/// POST /sessions/{id}/bind - Bind the executor's native session id
async fn bind_session(
    State(state): State<GatewayState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<GatewayBindRequest>,
) -> Result<Json<Value>, RelayError> {
    let upstream = BindSessionRequest {
        executor_session_id: req.executor_session_id,
        executor_type: Some(state.executor_type.clone()),
        hostname: Some(state.hostname.clone()),
    };
    let session = state
        .client
        .bind_session(session_id, &upstream)
        .await
        .map_err(relay_error)?;
    Ok(Json(session))
}

/// POST /sessions/{id}/events - Append a session event
async fn append_event(
    State(state): State<GatewayState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SessionEventRequest>,
) -> Result<StatusCode, RelayError> {
    state
        .client
        .append_event(session_id, &req)
        .await
        .map_err(relay_error)?;
    Ok(StatusCode::ACCEPTED)
}

/// PATCH /sessions/{id}/metadata - Merge keys into session metadata
async fn patch_metadata(
    State(state): State<GatewayState>,
    Path(session_id): Path<Uuid>,
    Json(patch_body): Json<Map<String, Value>>,
) -> Result<Json<Value>, RelayError> {
    let session = state
        .client
        .patch_metadata(session_id, &patch_body)
        .await
        .map_err(relay_error)?;
    Ok(Json(session))
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/sessions/{id}/bind", post(bind_session))
        .route("/sessions/{id}/events", post(append_event))
        .route("/sessions/{id}/metadata", patch(patch_metadata))
        .with_state(state)
}

/// Bind the gateway on localhost. Port 0 lets the OS pick; the chosen
/// address feeds the executor's environment.
pub async fn serve(
    state: GatewayState,
    port: u16,
) -> crate::error::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let addr = listener.local_addr()?;
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Gateway server error: {e}");
        }
    });
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeCoordinator;
    use serde_json::json;

    fn test_state() -> (Arc<FakeCoordinator>, GatewayState) {
        let client = Arc::new(FakeCoordinator::new());
        let state = GatewayState {
            client: client.clone(),
            hostname: "test-host".to_string(),
            executor_type: "claude-code".to_string(),
        };
        (client, state)
    }

    #[tokio::test]
    async fn bind_is_enriched_with_runner_identity() {
        let (client, state) = test_state();
        let session_id = Uuid::new_v4();

        bind_session(
            State(state),
            Path(session_id),
            Json(GatewayBindRequest {
                executor_session_id: "cc-native-7".to_string(),
            }),
        )
        .await
        .unwrap();

        let binds = client.binds.lock().unwrap();
        assert_eq!(binds.len(), 1);
        let (bound_id, req) = &binds[0];
        assert_eq!(*bound_id, session_id);
        assert_eq!(req.executor_session_id, "cc-native-7");
        assert_eq!(req.executor_type.as_deref(), Some("claude-code"));
        assert_eq!(req.hostname.as_deref(), Some("test-host"));
    }

    #[tokio::test]
    async fn events_are_relayed_and_accepted() {
        let (client, state) = test_state();
        let session_id = Uuid::new_v4();

        let status = append_event(
            State(state),
            Path(session_id),
            Json(SessionEventRequest {
                event_type: "tool_use".to_string(),
                data: json!({"tool": "grep"}),
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        let events = client.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.event_type, "tool_use");
    }

    #[tokio::test]
    async fn metadata_patch_reaches_upstream() {
        let (client, state) = test_state();
        let session_id = Uuid::new_v4();
        let mut patch_body = Map::new();
        patch_body.insert("phase".to_string(), json!("review"));

        patch_metadata(State(state), Path(session_id), Json(patch_body))
            .await
            .unwrap();

        let patches = client.metadata_patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1["phase"], json!("review"));
    }

    #[test]
    fn upstream_status_survives_relay() {
        let (status, body) = relay_error(RunnerError::api(409, "Session busy"));
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.0.error.contains("Session busy"));

        let (status, _) = relay_error(RunnerError::transport("connection refused"));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn serve_binds_an_ephemeral_port() {
        let (_, state) = test_state();
        let (addr, handle) = serve(state, 0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_loopback());
        handle.abort();
    }
}
