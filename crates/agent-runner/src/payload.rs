//! Executor stdin payload
//!
//! The versioned JSON document written to the executor adapter's stdin,
//! plus the runner-side values that finish `${runner.*}` resolution.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use ao_core::api::ClaimedRun;
use ao_core::blueprint::resolve_runner_tokens;
use ao_core::run::RunType;

use crate::config::RunnerIdentity;

pub const SCHEMA_VERSION: &str = "2.1";

#[derive(Debug, Serialize)]
pub struct ExecutorPayload {
    pub schema_version: String,
    pub mode: String,
    pub session_id: Uuid,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    pub executor_config: ExecutorConfig,
    pub agent_blueprint: Value,
}

#[derive(Debug, Serialize)]
pub struct ExecutorConfig {
    pub profile: String,
    /// The runner gateway address, not the coordinator itself
    pub orchestrator_api_url: String,
    pub options: Map<String, Value>,
}

/// Values the coordinator could not know; used to resolve the
/// `${runner.*}` tokens it left verbatim.
pub fn runner_values(identity: &RunnerIdentity) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert(
        "orchestrator_mcp_url".to_string(),
        Value::String(identity.orchestrator_mcp_url.clone()),
    );
    values.insert(
        "hostname".to_string(),
        Value::String(identity.hostname.clone()),
    );
    values.insert(
        "runner_id".to_string(),
        Value::String(identity.runner_id.clone()),
    );
    values.insert(
        "project_dir".to_string(),
        Value::String(identity.project_dir.clone()),
    );
    values.insert(
        "profile".to_string(),
        Value::String(identity.profile.as_str().to_string()),
    );
    values
}

/// Build the stdin payload for a claimed run. The blueprint gets its
/// final `${runner.*}` pass here; everything else was resolved at
/// enqueue time.
pub fn build_payload(run: &ClaimedRun, identity: &RunnerIdentity) -> ExecutorPayload {
    let mode = match run.run_type {
        RunType::StartSession => "start",
        RunType::ResumeSession => "resume",
    };
    let blueprint = resolve_runner_tokens(&run.resolved_agent_blueprint, &runner_values(identity));
    let project_dir = run
        .project_dir
        .clone()
        .unwrap_or_else(|| identity.project_dir.clone());

    ExecutorPayload {
        schema_version: SCHEMA_VERSION.to_string(),
        mode: mode.to_string(),
        session_id: run.session_id,
        prompt: run.prompt().unwrap_or_default().to_string(),
        project_dir: Some(project_dir),
        executor_config: ExecutorConfig {
            profile: identity.profile.as_str().to_string(),
            orchestrator_api_url: identity.gateway_url.clone(),
            options: Map::new(),
        },
        agent_blueprint: blueprint,
    }
}
