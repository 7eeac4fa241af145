//! Session model
//!
//! A session is a logical, possibly long-lived conversation. It outlives any
//! single run; resume runs reuse the same `session_id`. The executor's own
//! session id is bound exactly once, by the first run's gateway bind call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result};

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Finished,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Finished => "finished",
            SessionStatus::Error => "error",
        }
    }
}

/// A logical conversation tracked by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    /// Agent that opened the session; resume runs are built from it.
    pub agent_name: String,
    /// The executor's native session id, bound once.
    pub executor_session_id: Option<String>,
    pub executor_type: Option<String>,
    pub hostname: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: Uuid, agent_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            agent_name: agent_name.into(),
            executor_session_id: None,
            executor_type: None,
            hostname: None,
            status: SessionStatus::Pending,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bind the executor-native session id. Binding is write-once: a second
    /// bind with the same id is idempotent, a conflicting one is rejected.
    pub fn bind(
        &mut self,
        executor_session_id: &str,
        executor_type: Option<String>,
        hostname: Option<String>,
    ) -> Result<()> {
        match &self.executor_session_id {
            Some(existing) if existing != executor_session_id => {
                return Err(Error::InvalidInput(format!(
                    "Session {} is already bound to executor session {}",
                    self.session_id, existing
                )));
            }
            Some(_) => return Ok(()),
            None => {}
        }
        self.executor_session_id = Some(executor_session_id.to_string());
        if executor_type.is_some() {
            self.executor_type = executor_type;
        }
        if hostname.is_some() {
            self.hostname = hostname;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Shallow-merge a metadata patch; patch keys win.
    pub fn patch_metadata(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.metadata.insert(key, value);
        }
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// One entry in a session's append-only event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl SessionEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            at: Utc::now(),
            event_type: event_type.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bind_is_write_once() {
        let mut session = Session::new(Uuid::new_v4(), "reviewer");
        session
            .bind("exec-123", Some("claude-code".to_string()), None)
            .unwrap();
        assert_eq!(session.executor_session_id.as_deref(), Some("exec-123"));

        // Same id again is fine.
        session.bind("exec-123", None, None).unwrap();

        // A different id is a conflict.
        let err = session.bind("exec-456", None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(session.executor_session_id.as_deref(), Some("exec-123"));
    }

    #[test]
    fn metadata_patch_is_shallow_merge() {
        let mut session = Session::new(Uuid::new_v4(), "reviewer");
        session.patch_metadata(
            json!({"branch": "main", "pr": 41})
                .as_object()
                .unwrap()
                .clone(),
        );
        session.patch_metadata(json!({"pr": 42}).as_object().unwrap().clone());

        assert_eq!(session.metadata["branch"], json!("main"));
        assert_eq!(session.metadata["pr"], json!(42));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Finished).unwrap(),
            "\"finished\""
        );
    }
}
