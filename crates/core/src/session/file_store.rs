//! File-based session storage
//!
//! Directory structure:
//! ```text
//! data/
//!   sessions.json            # Session records
//!   session-events/
//!     {session_id}.jsonl     # Append-only event log per session
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::model::{Session, SessionEvent};
use crate::{Error, Result};

/// File-based session store using JSON plus per-session JSONL event logs
pub struct FileSessionStore {
    path: PathBuf,
    events_dir: PathBuf,
    cache: RwLock<HashMap<Uuid, Session>>,
}

impl FileSessionStore {
    pub async fn new(path: impl Into<PathBuf>, events_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            let sessions: Vec<Session> = serde_json::from_str(&content)?;
            sessions.into_iter().map(|s| (s.session_id, s)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            events_dir: events_dir.into(),
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self) -> Result<()> {
        let cache = self.cache.read().await;
        let sessions: Vec<&Session> = cache.values().collect();
        let content = serde_json::to_string_pretty(&sessions)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    fn events_path(&self, session_id: Uuid) -> PathBuf {
        self.events_dir.join(format!("{}.jsonl", session_id))
    }

    pub async fn create(&self, session: Session) -> Result<Session> {
        {
            let mut cache = self.cache.write().await;
            if cache.contains_key(&session.session_id) {
                return Err(Error::InvalidInput(format!(
                    "Session with ID {} already exists",
                    session.session_id
                )));
            }
            cache.insert(session.session_id, session.clone());
        }
        self.persist().await?;
        Ok(session)
    }

    /// Fetch the session, creating a fresh record if it doesn't exist yet.
    pub async fn get_or_create(&self, session_id: Uuid, agent_name: &str) -> Result<Session> {
        let (session, created) = {
            let mut cache = self.cache.write().await;
            match cache.get(&session_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let session = Session::new(session_id, agent_name);
                    cache.insert(session_id, session.clone());
                    (session, true)
                }
            }
        };
        if created {
            self.persist().await?;
        }
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let cache = self.cache.read().await;
        Ok(cache.get(&session_id).cloned())
    }

    pub async fn list(&self) -> Result<Vec<Session>> {
        let cache = self.cache.read().await;
        let mut sessions: Vec<Session> = cache.values().cloned().collect();
        // Sort by created_at descending (newest first)
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Apply `f` to a copy of the stored session; commit only if it succeeds.
    pub async fn update<F>(&self, session_id: Uuid, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) -> Result<()>,
    {
        let updated = {
            let mut cache = self.cache.write().await;
            let session = cache
                .get_mut(&session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
            let mut candidate = session.clone();
            f(&mut candidate)?;
            *session = candidate.clone();
            candidate
        };
        self.persist().await?;
        Ok(updated)
    }

    /// Append an event to the session's JSONL log.
    pub async fn append_event(&self, session_id: Uuid, event: &SessionEvent) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if !cache.contains_key(&session_id) {
                return Err(Error::SessionNotFound(session_id.to_string()));
            }
        }

        tokio::fs::create_dir_all(&self.events_dir).await?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(session_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Load all events for a session. Malformed lines are skipped with a
    /// warning rather than failing the whole read.
    pub async fn events(&self, session_id: Uuid) -> Result<Vec<SessionEvent>> {
        let path = self.events_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut events = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        "Failed to parse event at line {} in {}: {}",
                        line_num,
                        path.display(),
                        e
                    );
                    continue;
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileSessionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(
            temp_dir.path().join("sessions.json"),
            temp_dir.path().join("session-events"),
        )
        .await
        .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (store, _temp) = create_test_store().await;

        let session = Session::new(Uuid::new_v4(), "reviewer");
        let id = session.session_id;
        store.create(session).await.unwrap();

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.agent_name, "reviewer");
        assert_eq!(fetched.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (store, _temp) = create_test_store().await;
        let id = Uuid::new_v4();

        let first = store.get_or_create(id, "reviewer").await.unwrap();
        let second = store.get_or_create(id, "other-agent").await.unwrap();

        // Second call returns the existing record, agent name unchanged.
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.agent_name, "reviewer");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_store_unchanged() {
        let (store, _temp) = create_test_store().await;

        let session = Session::new(Uuid::new_v4(), "reviewer");
        let id = session.session_id;
        store.create(session).await.unwrap();

        store
            .update(id, |s| s.bind("exec-1", None, None))
            .await
            .unwrap();

        // A conflicting bind fails and must not clobber the stored binding.
        let result = store.update(id, |s| s.bind("exec-2", None, None)).await;
        assert!(result.is_err());

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.executor_session_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let (store, _temp) = create_test_store().await;
        let result = store
            .update(Uuid::new_v4(), |s| {
                s.set_status(SessionStatus::Running);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_append_and_load_events() {
        let (store, _temp) = create_test_store().await;

        let session = Session::new(Uuid::new_v4(), "reviewer");
        let id = session.session_id;
        store.create(session).await.unwrap();

        for i in 0..3 {
            let event = SessionEvent::new("progress", json!({"step": i}));
            store.append_event(id, &event).await.unwrap();
        }

        let events = store.events(id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].data, json!({"step": 2}));

        // No log file yet for another session: empty, not an error.
        let other = Session::new(Uuid::new_v4(), "reviewer");
        let other_id = other.session_id;
        store.create(other).await.unwrap();
        assert!(store.events(other_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_event_unknown_session() {
        let (store, _temp) = create_test_store().await;
        let event = SessionEvent::new("progress", json!({}));
        let result = store.append_event(Uuid::new_v4(), &event).await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_event_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let events_dir = temp_dir.path().join("session-events");
        let store = FileSessionStore::new(temp_dir.path().join("sessions.json"), &events_dir)
            .await
            .unwrap();

        let session = Session::new(Uuid::new_v4(), "reviewer");
        let id = session.session_id;
        store.create(session).await.unwrap();

        store
            .append_event(id, &SessionEvent::new("progress", json!({"step": 1})))
            .await
            .unwrap();

        // Corrupt the log by hand, then append another good line.
        let log_path = events_dir.join(format!("{}.jsonl", id));
        let mut content = tokio::fs::read_to_string(&log_path).await.unwrap();
        content.push_str("not json at all\n");
        tokio::fs::write(&log_path, content).await.unwrap();
        store
            .append_event(id, &SessionEvent::new("progress", json!({"step": 2})))
            .await
            .unwrap();

        let events = store.events(id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions.json");
        let events_dir = temp_dir.path().join("session-events");

        let id;
        {
            let store = FileSessionStore::new(&path, &events_dir).await.unwrap();
            let session = Session::new(Uuid::new_v4(), "reviewer");
            id = session.session_id;
            store.create(session).await.unwrap();
            store
                .update(id, |s| {
                    s.set_status(SessionStatus::Running);
                    Ok(())
                })
                .await
                .unwrap();
        }

        {
            let store = FileSessionStore::new(&path, &events_dir).await.unwrap();
            let session = store.get(id).await.unwrap().unwrap();
            assert_eq!(session.status, SessionStatus::Running);
        }
    }
}
