//! Wire types shared between the coordinator and the runner
//!
//! Everything here crosses an HTTP boundary and uses camelCase field names.
//! Internal and persisted models stay snake_case; conversions live next to
//! the DTOs they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::run::{Run, RunSpec, RunStatus, RunType};
use crate::runner::{RunnerInfo, RunnerStatus};
use crate::session::{Session, SessionStatus};
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Run enqueue & reporting
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRunRequest {
    pub run_type: RunType,
    /// Required for `start_session`; resume runs take the session's agent.
    pub agent_name: Option<String>,
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub scope: Map<String, Value>,
    pub project_dir: Option<String>,
    pub parent_session_id: Option<Uuid>,
    #[serde(default)]
    pub callback: bool,
    #[serde(default)]
    pub demands: Vec<String>,
}

impl From<EnqueueRunRequest> for RunSpec {
    fn from(req: EnqueueRunRequest) -> Self {
        RunSpec {
            run_type: req.run_type,
            agent_name: req.agent_name.unwrap_or_default(),
            session_id: req.session_id,
            parameters: req.parameters,
            scope: req.scope,
            project_dir: req.project_dir,
            parent_session_id: req.parent_session_id,
            callback: req.callback,
            demands: req.demands,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRunResponse {
    pub run_id: Uuid,
    pub session_id: Uuid,
}

/// Statuses a runner may report. `pending` and `claimed` are
/// coordinator-owned and deliberately unrepresentable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl From<ReportedStatus> for RunStatus {
    fn from(status: ReportedStatus) -> Self {
        match status {
            ReportedStatus::Running => RunStatus::Running,
            ReportedStatus::Completed => RunStatus::Completed,
            ReportedStatus::Failed => RunStatus::Failed,
            ReportedStatus::Stopped => RunStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusRequest {
    pub status: ReportedStatus,
    pub error: Option<String>,
    pub result: Option<String>,
}

/// What a runner receives from a successful claim. Scope stays behind on
/// the coordinator; the blueprint is already resolved apart from
/// `${runner.*}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedRun {
    pub run_id: Uuid,
    pub run_type: RunType,
    pub session_id: Uuid,
    pub agent_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub project_dir: Option<String>,
    pub resolved_agent_blueprint: Value,
}

impl From<&Run> for ClaimedRun {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id,
            run_type: run.run_type,
            session_id: run.session_id,
            agent_name: run.agent_name.clone(),
            parameters: run.parameters.clone(),
            project_dir: run.project_dir.clone(),
            resolved_agent_blueprint: run.resolved_agent_blueprint.clone(),
        }
    }
}

impl ClaimedRun {
    pub fn prompt(&self) -> Option<&str> {
        self.parameters.get("prompt").and_then(Value::as_str)
    }
}

// ============================================================================
// Runner registration & heartbeat
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRunnerRequest {
    pub hostname: String,
    pub project_dir: String,
    pub executor_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RegisterRunnerRequest {
    /// Identity fields are mandatory; a registration without them is a
    /// client error, never a default-filled record.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("hostname", &self.hostname),
            ("projectDir", &self.project_dir),
            ("executorType", &self.executor_type),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Registration field '{}' must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSummary {
    pub runner_id: String,
    pub hostname: String,
    pub project_dir: String,
    pub executor_type: String,
    pub tags: Vec<String>,
    pub status: RunnerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl From<&RunnerInfo> for RunnerSummary {
    fn from(runner: &RunnerInfo) -> Self {
        Self {
            runner_id: runner.runner_id.clone(),
            hostname: runner.hostname.clone(),
            project_dir: runner.project_dir.clone(),
            executor_type: runner.executor_type.clone(),
            tags: runner.tags.clone(),
            status: runner.status,
            registered_at: runner.registered_at,
            last_heartbeat_at: runner.last_heartbeat_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRunnerResponse {
    pub runner: RunnerSummary,
    /// Bearer token for all subsequent runner calls.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub runner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// Runs this runner should cancel, piggybacked on the heartbeat.
    #[serde(default)]
    pub stop_run_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterRequest {
    pub runner_id: String,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindSessionRequest {
    pub executor_session_id: String,
    pub executor_type: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub agent_name: String,
    pub executor_session_id: Option<String>,
    pub executor_type: Option<String>,
    pub hostname: Option<String>,
    pub status: SessionStatus,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id,
            agent_name: session.agent_name.clone(),
            executor_session_id: session.executor_session_id.clone(),
            executor_type: session.executor_type.clone(),
            hostname: session.hostname.clone(),
            status: session.status,
            metadata: session.metadata.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub name: String,
    pub description: Option<String>,
}
