use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result};

/// What a run does to its session: open a new one, or continue an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    StartSession,
    ResumeSession,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSession => "start_session",
            Self::ResumeSession => "resume_session",
        }
    }
}

/// Dispatch state of a run.
///
/// `pending -> claimed -> running -> {completed | failed | stopped}`, plus
/// `pending -> stopped` when a stop arrives before any runner claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Claimed,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Claimed | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Outcome of applying a reported status to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status changed.
    Applied,
    /// The run was already terminal; duplicate reports are absorbed.
    AlreadyTerminal,
}

/// Creation-time description of a run, before ids are assigned and
/// placeholders are resolved.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub run_type: RunType,
    pub agent_name: String,
    pub session_id: Option<Uuid>,
    pub parameters: Map<String, Value>,
    pub scope: Map<String, Value>,
    pub project_dir: Option<String>,
    pub parent_session_id: Option<Uuid>,
    pub callback: bool,
    pub demands: Vec<String>,
}

impl RunSpec {
    pub fn new(run_type: RunType, agent_name: impl Into<String>) -> Self {
        Self {
            run_type,
            agent_name: agent_name.into(),
            session_id: None,
            parameters: Map::new(),
            scope: Map::new(),
            project_dir: None,
            parent_session_id: None,
            callback: false,
            demands: Vec::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_scope(mut self, scope: Map<String, Value>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_parent_session(mut self, parent: Uuid) -> Self {
        self.parent_session_id = Some(parent);
        self
    }

    pub fn with_callback(mut self, callback: bool) -> Self {
        self.callback = callback;
        self
    }

    pub fn with_demands(mut self, demands: Vec<String>) -> Self {
        self.demands = demands;
        self
    }
}

/// A persistent dispatchable unit of agent work.
///
/// `scope` is operator/tenancy context: it is never copied into
/// `parameters` and must not appear on any surface the agent can read.
/// `resolved_agent_blueprint` is computed once at enqueue and immutable
/// afterwards; only `${runner.*}` tokens may remain unresolved inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub run_type: RunType,
    pub session_id: Uuid,
    pub agent_name: String,
    pub parameters: Map<String, Value>,
    pub scope: Map<String, Value>,
    pub project_dir: Option<String>,
    pub parent_session_id: Option<Uuid>,
    pub callback: bool,
    pub demands: Vec<String>,
    pub resolved_agent_blueprint: Value,
    pub status: RunStatus,
    pub runner_id: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub stop_requested: bool,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Assemble a pending run from its spec, the ids the coordinator
    /// generated for it, the merged scope, and the resolved blueprint.
    pub fn from_spec(
        id: Uuid,
        session_id: Uuid,
        spec: RunSpec,
        scope: Map<String, Value>,
        resolved_agent_blueprint: Value,
    ) -> Self {
        Self {
            id,
            run_type: spec.run_type,
            session_id,
            agent_name: spec.agent_name,
            parameters: spec.parameters,
            scope,
            project_dir: spec.project_dir,
            parent_session_id: spec.parent_session_id,
            callback: spec.callback,
            demands: spec.demands,
            resolved_agent_blueprint,
            status: RunStatus::Pending,
            runner_id: None,
            error: None,
            result: None,
            stop_requested: false,
            created_at: Utc::now(),
            claimed_at: None,
            finished_at: None,
        }
    }

    /// Claim transition. Only valid from `pending`; the caller (the store)
    /// serializes concurrent claims.
    pub fn mark_claimed(&mut self, runner_id: &str) -> Result<()> {
        if self.status != RunStatus::Pending {
            return Err(Error::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: RunStatus::Claimed.as_str().to_string(),
            });
        }
        self.status = RunStatus::Claimed;
        self.runner_id = Some(runner_id.to_string());
        self.claimed_at = Some(Utc::now());
        Ok(())
    }

    /// Apply a runner-reported status.
    ///
    /// Terminal runs absorb any further report as a no-op. A report can
    /// never skip `claimed`: runs that were never claimed only accept
    /// `stopped` (the pre-claim stop path).
    pub fn apply_report(
        &mut self,
        status: RunStatus,
        error: Option<String>,
        result: Option<String>,
    ) -> Result<TransitionOutcome> {
        if self.status.is_terminal() {
            return Ok(TransitionOutcome::AlreadyTerminal);
        }

        let allowed = match (self.status, status) {
            (RunStatus::Pending, RunStatus::Stopped) => true,
            (RunStatus::Claimed, RunStatus::Running) => true,
            (RunStatus::Claimed, s) if s.is_terminal() => true,
            (RunStatus::Running, s) if s.is_terminal() => true,
            _ => false,
        };
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
            self.error = error;
            self.result = result;
        }
        Ok(TransitionOutcome::Applied)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The `parameters.prompt` string, when present.
    pub fn prompt(&self) -> Option<&str> {
        self.parameters.get("prompt").and_then(Value::as_str)
    }
}

/// Summary of a run for listing purposes. Carries neither `scope` nor the
/// resolved blueprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: Uuid,
    pub run_type: RunType,
    pub session_id: Uuid,
    pub agent_name: String,
    pub prompt_preview: String,
    pub demands: Vec<String>,
    pub status: RunStatus,
    pub runner_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        let prompt = run.prompt().unwrap_or_default();
        let prompt_preview = if prompt.chars().count() > 100 {
            let head: String = prompt.chars().take(100).collect();
            format!("{}...", head)
        } else {
            prompt.to_string()
        };

        Self {
            id: run.id,
            run_type: run.run_type,
            session_id: run.session_id,
            agent_name: run.agent_name.clone(),
            prompt_preview,
            demands: run.demands.clone(),
            status: run.status,
            runner_id: run.runner_id.clone(),
            error: run.error.clone(),
            created_at: run.created_at,
            claimed_at: run.claimed_at,
            finished_at: run.finished_at,
        }
    }
}
