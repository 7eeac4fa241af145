//! Embedded orchestration facade
//!
//! A loopback JSON-RPC 2.0 tool-call server the running agent uses to
//! reach the orchestrator: list agents, delegate runs, resume its own
//! session tree. Calls ride the runner's credential; tool input can
//! neither name nor replace it, and nothing here ever returns scope.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::error;
use uuid::Uuid;

use ao_core::api::EnqueueRunRequest;
use ao_core::run::RunType;

use crate::client::CoordinatorApi;

#[derive(Clone)]
pub struct FacadeState {
    pub client: Arc<dyn CoordinatorApi>,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method '{method}' not found"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32000,
            message: message.into(),
        }
    }
}

fn respond(id: Option<Value>, result: Result<Value, RpcError>) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(value),
            error: None,
        },
        Err(error) => RpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        },
    }
}

/// POST /mcp - JSON-RPC tool-call endpoint for the running agent
async fn handle_rpc(
    State(state): State<FacadeState>,
    Json(req): Json<RpcRequest>,
) -> Json<RpcResponse> {
    if req.jsonrpc != "2.0" {
        return Json(respond(
            req.id,
            Err(RpcError::invalid_request("Expected jsonrpc \"2.0\"")),
        ));
    }
    let result = match req.method.as_str() {
        "initialize" => Ok(initialize_result()),
        "tools/list" => Ok(tool_definitions()),
        "tools/call" => call_tool(&state, &req.params).await,
        other => Err(RpcError::method_not_found(other)),
    };
    Json(respond(req.id, result))
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": "agent-orchestrator-runner",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn tool_definitions() -> Value {
    json!({
        "tools": [
            {
                "name": "list_agents",
                "description": "List the agent blueprints available for delegation",
                "inputSchema": {
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false,
                },
            },
            {
                "name": "start_run",
                "description": "Start a new run of a named agent in a fresh session",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent_name": { "type": "string", "description": "Blueprint to run" },
                        "prompt": { "type": "string", "description": "Task for the agent" },
                        "parent_session_id": {
                            "type": "string",
                            "description": "Session delegating this run",
                        },
                        "callback": {
                            "type": "boolean",
                            "description": "Resume the parent session when the run finishes",
                        },
                        "demands": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Tags a claiming runner must carry",
                        },
                    },
                    "required": ["agent_name", "prompt"],
                },
            },
            {
                "name": "resume_session",
                "description": "Send a follow-up prompt to an existing session",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "session_id": { "type": "string" },
                        "prompt": { "type": "string" },
                    },
                    "required": ["session_id", "prompt"],
                },
            },
            {
                "name": "get_session_status",
                "description": "Fetch the current state of a session",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "session_id": { "type": "string" },
                    },
                    "required": ["session_id"],
                },
            },
        ],
    })
}

async fn call_tool(state: &FacadeState, params: &Value) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("Missing tool name"))?;
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match name {
        "list_agents" => {
            let agents = state
                .client
                .list_agents()
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            text_result(&agents)
        }
        "start_run" => {
            let req = EnqueueRunRequest {
                run_type: RunType::StartSession,
                agent_name: Some(required_str(&args, "agent_name")?),
                session_id: None,
                parameters: prompt_parameters(required_str(&args, "prompt")?),
                scope: Map::new(),
                project_dir: None,
                parent_session_id: optional_uuid(&args, "parent_session_id")?,
                callback: args
                    .get("callback")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                demands: string_array(&args, "demands")?,
            };
            let enqueued = state
                .client
                .enqueue_run(&req)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            text_result(&enqueued)
        }
        "resume_session" => {
            let req = EnqueueRunRequest {
                run_type: RunType::ResumeSession,
                agent_name: None,
                session_id: Some(required_uuid(&args, "session_id")?),
                parameters: prompt_parameters(required_str(&args, "prompt")?),
                scope: Map::new(),
                project_dir: None,
                parent_session_id: None,
                callback: false,
                demands: Vec::new(),
            };
            let enqueued = state
                .client
                .enqueue_run(&req)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            text_result(&enqueued)
        }
        "get_session_status" => {
            let session_id = required_uuid(&args, "session_id")?;
            let session = state
                .client
                .get_session(session_id)
                .await
                .map_err(|e| RpcError::internal(e.to_string()))?;
            text_result(&session)
        }
        other => Err(RpcError::invalid_params(format!("Unknown tool '{other}'"))),
    }
}

fn prompt_parameters(prompt: String) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert("prompt".to_string(), Value::String(prompt));
    parameters
}

fn required_str(args: &Value, key: &str) -> Result<String, RpcError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params(format!("Missing required argument '{key}'")))
}

fn required_uuid(args: &Value, key: &str) -> Result<Uuid, RpcError> {
    let raw = required_str(args, key)?;
    raw.parse()
        .map_err(|_| RpcError::invalid_params(format!("Argument '{key}' is not a valid UUID")))
}

fn optional_uuid(args: &Value, key: &str) -> Result<Option<Uuid>, RpcError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let raw = value.as_str().ok_or_else(|| {
                RpcError::invalid_params(format!("Argument '{key}' must be a string"))
            })?;
            raw.parse().map(Some).map_err(|_| {
                RpcError::invalid_params(format!("Argument '{key}' is not a valid UUID"))
            })
        }
    }
}

fn string_array(args: &Value, key: &str) -> Result<Vec<String>, RpcError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    RpcError::invalid_params(format!("Argument '{key}' must contain strings"))
                })
            })
            .collect(),
        Some(_) => Err(RpcError::invalid_params(format!(
            "Argument '{key}' must be an array"
        ))),
    }
}

/// MCP tool results carry their payload as a text content block.
fn text_result<T: Serialize>(payload: &T) -> Result<Value, RpcError> {
    let text = serde_json::to_string_pretty(payload)
        .map_err(|e| RpcError::internal(format!("Failed to encode result: {e}")))?;
    Ok(json!({
        "content": [ { "type": "text", "text": text } ],
    }))
}

pub fn router(state: FacadeState) -> Router {
    Router::new().route("/mcp", post(handle_rpc)).with_state(state)
}

pub async fn serve(
    state: FacadeState,
    port: u16,
) -> crate::error::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let addr = listener.local_addr()?;
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Facade server error: {e}");
        }
    });
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeCoordinator;
    use ao_core::api::AgentSummary;

    fn test_state() -> (Arc<FakeCoordinator>, FacadeState) {
        let client = Arc::new(FakeCoordinator::new());
        let state = FacadeState {
            client: client.clone(),
        };
        (client, state)
    }

    async fn rpc(state: FacadeState, method: &str, params: Value) -> RpcResponse {
        handle_rpc(
            State(state),
            Json(RpcRequest {
                jsonrpc: "2.0".to_string(),
                id: Some(json!(1)),
                method: method.to_string(),
                params,
            }),
        )
        .await
        .0
    }

    fn result_text(response: &RpcResponse) -> String {
        response.result.as_ref().unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn initialize_reports_tool_capability() {
        let (_, state) = test_state();
        let response = rpc(state, "initialize", json!({})).await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_names_all_four_tools() {
        let (_, state) = test_state();
        let response = rpc(state, "tools/list", json!({})).await;
        let tools = response.result.unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            tools,
            vec![
                "list_agents",
                "start_run",
                "resume_session",
                "get_session_status"
            ]
        );
    }

    #[tokio::test]
    async fn list_agents_returns_blueprint_summaries() {
        let (client, state) = test_state();
        client.agents.lock().unwrap().push(AgentSummary {
            name: "reviewer".to_string(),
            description: Some("Reviews changes".to_string()),
        });

        let response = rpc(
            state,
            "tools/call",
            json!({"name": "list_agents", "arguments": {}}),
        )
        .await;

        assert!(result_text(&response).contains("reviewer"));
    }

    #[tokio::test]
    async fn start_run_translates_to_enqueue() {
        let (client, state) = test_state();
        let parent = Uuid::new_v4();

        let response = rpc(
            state,
            "tools/call",
            json!({
                "name": "start_run",
                "arguments": {
                    "agent_name": "helper",
                    "prompt": "fix the tests",
                    "parent_session_id": parent.to_string(),
                    "callback": true,
                    "demands": ["gpu"],
                },
            }),
        )
        .await;

        assert!(response.error.is_none());
        let enqueues = client.enqueues.lock().unwrap();
        assert_eq!(enqueues.len(), 1);
        let req = &enqueues[0];
        assert_eq!(req.run_type, RunType::StartSession);
        assert_eq!(req.agent_name.as_deref(), Some("helper"));
        assert_eq!(req.parent_session_id, Some(parent));
        assert!(req.callback);
        assert_eq!(req.demands, vec!["gpu".to_string()]);
        assert_eq!(req.parameters["prompt"], json!("fix the tests"));
        // The agent never supplies scope through this surface.
        assert!(req.scope.is_empty());
    }

    #[tokio::test]
    async fn resume_session_targets_the_named_session() {
        let (client, state) = test_state();
        let session_id = Uuid::new_v4();

        let response = rpc(
            state,
            "tools/call",
            json!({
                "name": "resume_session",
                "arguments": {
                    "session_id": session_id.to_string(),
                    "prompt": "now also update the docs",
                },
            }),
        )
        .await;

        assert!(response.error.is_none());
        let enqueues = client.enqueues.lock().unwrap();
        assert_eq!(enqueues[0].run_type, RunType::ResumeSession);
        assert_eq!(enqueues[0].session_id, Some(session_id));
        assert!(enqueues[0].agent_name.is_none());
    }

    #[tokio::test]
    async fn get_session_status_round_trips() {
        let (_, state) = test_state();
        let session_id = Uuid::new_v4();

        let response = rpc(
            state,
            "tools/call",
            json!({
                "name": "get_session_status",
                "arguments": { "session_id": session_id.to_string() },
            }),
        )
        .await;

        assert!(result_text(&response).contains(&session_id.to_string()));
    }

    #[tokio::test]
    async fn unknown_method_and_tool_are_rejected() {
        let (_, state) = test_state();
        let response = rpc(state, "resources/list", json!({})).await;
        assert_eq!(response.error.unwrap().code, -32601);

        let (_, state) = test_state();
        let response = rpc(
            state,
            "tools/call",
            json!({"name": "drop_credentials", "arguments": {}}),
        )
        .await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid_params() {
        let (client, state) = test_state();
        let response = rpc(
            state,
            "tools/call",
            json!({"name": "start_run", "arguments": {"agent_name": "helper"}}),
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert!(error.message.contains("prompt"));
        assert!(client.enqueues.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_jsonrpc_version_is_invalid_request() {
        let (_, state) = test_state();
        let response = handle_rpc(
            State(state),
            Json(RpcRequest {
                jsonrpc: "1.0".to_string(),
                id: Some(json!(9)),
                method: "initialize".to_string(),
                params: json!({}),
            }),
        )
        .await
        .0;
        assert_eq!(response.error.unwrap().code, -32600);
    }
}
