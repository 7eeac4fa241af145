//! Run queue and dispatch
//!
//! The queue owns the full enqueue pipeline (demand validation, session
//! bookkeeping, scope inheritance, placeholder resolution, required-config
//! validation), the long-poll claim path, status reporting, and the
//! callback glue that turns a finished child run into a resume run on its
//! parent session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use ao_core::blueprint::{resolve, validate_required_config, PlaceholderContext, RuntimeContext};
use ao_core::run::{
    ClaimFilter, Run, RunRepository, RunSpec, RunStatus, RunType, TransitionOutcome,
};
use ao_core::session::{FileSessionStore, SessionStatus};
use ao_core::{Error, Result};

use crate::agents::BlueprintLibrary;

fn is_valid_demand(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

pub struct RunQueue {
    runs: Arc<dyn RunRepository>,
    sessions: Arc<FileSessionStore>,
    agents: BlueprintLibrary,
    /// Wakes long-pollers whenever a run may have become claimable.
    notify: Notify,
}

impl RunQueue {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        sessions: Arc<FileSessionStore>,
        agents: BlueprintLibrary,
    ) -> Self {
        Self {
            runs,
            sessions,
            agents,
            notify: Notify::new(),
        }
    }

    /// Enqueue a caller-submitted run. Sessions are single-threaded: a
    /// session with any non-terminal run rejects further submissions.
    pub async fn enqueue(&self, spec: RunSpec) -> Result<Run> {
        self.enqueue_inner(spec, true).await
    }

    async fn enqueue_inner(&self, mut spec: RunSpec, enforce_busy: bool) -> Result<Run> {
        for tag in &spec.demands {
            if !is_valid_demand(tag) {
                return Err(Error::InvalidInput(format!(
                    "Invalid demand tag '{}': allowed characters are [A-Za-z0-9._:-]",
                    tag
                )));
            }
        }

        let (session_id, agent_name) = match spec.run_type {
            RunType::StartSession => {
                if spec.agent_name.is_empty() {
                    return Err(Error::InvalidInput(
                        "agentName is required for start_session runs".to_string(),
                    ));
                }
                (
                    spec.session_id.unwrap_or_else(Uuid::new_v4),
                    spec.agent_name.clone(),
                )
            }
            RunType::ResumeSession => {
                let session_id = spec.session_id.ok_or_else(|| {
                    Error::InvalidInput(
                        "sessionId is required for resume_session runs".to_string(),
                    )
                })?;
                // Resume runs always use the agent the session was opened
                // with; a caller-supplied name is ignored.
                let session = self
                    .sessions
                    .get(session_id)
                    .await?
                    .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
                (session_id, session.agent_name)
            }
        };

        if enforce_busy {
            let existing = self.runs.list_by_session(session_id).await?;
            if existing.iter().any(|r| !r.status.is_terminal()) {
                return Err(Error::SessionBusy(session_id.to_string()));
            }
        }

        let blueprint = self.agents.load(&agent_name).await?;

        // Scope inheritance: parent session's stored scope under the
        // child's own entries, child keys win.
        let mut scope = match spec.parent_session_id {
            Some(parent) => self.session_scope(parent).await?,
            None => Map::new(),
        };
        for (key, value) in spec.scope.clone() {
            scope.insert(key, value);
        }

        let run_id = Uuid::new_v4();
        let ctx = PlaceholderContext::new(
            spec.parameters.clone(),
            scope.clone(),
            RuntimeContext { run_id, session_id },
        );
        let resolved = resolve(&blueprint, &ctx);
        validate_required_config(&resolved)?;

        self.sessions.get_or_create(session_id, &agent_name).await?;

        spec.agent_name = agent_name;
        let run = Run::from_spec(run_id, session_id, spec, scope, resolved);
        let run = self.runs.create(run).await?;

        info!(
            "Enqueued {} run {} for agent '{}' on session {}",
            run.run_type.as_str(),
            run.id,
            run.agent_name,
            run.session_id
        );
        self.notify.notify_waiters();
        Ok(run)
    }

    /// The parent session's effective scope: the scope stored on its most
    /// recent run. The session record itself must exist.
    async fn session_scope(&self, session_id: Uuid) -> Result<Map<String, Value>> {
        if self.sessions.get(session_id).await?.is_none() {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        let runs = self.runs.list_by_session(session_id).await?;
        Ok(runs.last().map(|r| r.scope.clone()).unwrap_or_default())
    }

    /// Long-poll claim: wait up to `timeout` for a run the filter can take.
    pub async fn claim(&self, filter: &ClaimFilter, timeout: Duration) -> Result<Option<Run>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the wakeup before checking, so an enqueue between the
            // check and the wait is not lost.
            let notified = self.notify.notified();
            if let Some(run) = self.runs.claim_next(filter).await? {
                info!("Run {} claimed by {}", run.id, filter.runner_id);
                return Ok(Some(run));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => return Ok(None),
            }
        }
    }

    /// Apply a runner's status report. Only the claiming runner may report;
    /// the transition that lands the run terminal fires the callback
    /// protocol exactly once.
    pub async fn report_status(
        &self,
        run_id: Uuid,
        reporter: &str,
        status: RunStatus,
        error: Option<String>,
        result: Option<String>,
    ) -> Result<(Run, TransitionOutcome)> {
        let current = self
            .runs
            .get(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        if current.runner_id.as_deref() != Some(reporter) {
            return Err(Error::Forbidden(format!(
                "Run {} is not claimed by runner {}",
                run_id, reporter
            )));
        }

        let (run, outcome) = self.runs.transition(run_id, status, error, result).await?;
        if outcome == TransitionOutcome::Applied {
            self.sync_session_status(&run).await?;
            if run.status.is_terminal() {
                info!(
                    "Run {} finished with status {}",
                    run.id,
                    run.status.as_str()
                );
                self.fire_callback(&run).await;
                // A terminal run may unblock queued work on its session.
                self.notify.notify_waiters();
            }
        }
        Ok((run, outcome))
    }

    /// Request a stop. Pending runs stop immediately; active runs are
    /// flagged and the owning runner picks the signal up via heartbeat.
    /// Stops of terminal runs are successes.
    pub async fn request_stop(&self, run_id: Uuid) -> Result<Run> {
        let (run, stopped_now) = self.runs.request_stop(run_id).await?;
        if stopped_now {
            info!("Run {} stopped before any claim", run.id);
            self.sync_session_status(&run).await?;
            self.fire_callback(&run).await;
            self.notify.notify_waiters();
        } else if run.stop_requested && run.status.is_active() {
            info!(
                "Stop requested for run {}, delivering to runner {:?}",
                run.id, run.runner_id
            );
        }
        Ok(run)
    }

    /// Mirror a run transition onto its session's status.
    async fn sync_session_status(&self, run: &Run) -> Result<()> {
        let status = match run.status {
            RunStatus::Running => SessionStatus::Running,
            RunStatus::Completed | RunStatus::Stopped => SessionStatus::Finished,
            RunStatus::Failed => SessionStatus::Error,
            _ => return Ok(()),
        };
        self.sessions
            .update(run.session_id, |s| {
                s.set_status(status);
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Enqueue the resume run a callback child owes its parent. Failures
    /// are logged, never propagated into the status report that caused
    /// them.
    async fn fire_callback(&self, child: &Run) {
        if !child.callback {
            return;
        }
        let Some(parent_session_id) = child.parent_session_id else {
            return;
        };
        match self.enqueue_callback_resume(child, parent_session_id).await {
            Ok(resume) => info!(
                "Callback: enqueued resume run {} on session {} for child {}",
                resume.id, parent_session_id, child.id
            ),
            Err(e) => warn!(
                "Callback for run {} could not enqueue a resume on session {}: {}",
                child.id, parent_session_id, e
            ),
        }
    }

    async fn enqueue_callback_resume(&self, child: &Run, parent_session_id: Uuid) -> Result<Run> {
        let child_status = child.status.as_str();
        let mut prompt = format!(
            "Delegated run {} (agent '{}') finished with status {}.",
            child.id, child.agent_name, child_status
        );
        if let Some(result) = &child.result {
            prompt.push_str("\n\nResult:\n");
            prompt.push_str(result);
        }
        if let Some(error) = &child.error {
            prompt.push_str("\n\nError:\n");
            prompt.push_str(error);
        }

        let mut parameters = Map::new();
        parameters.insert("prompt".to_string(), Value::String(prompt));
        parameters.insert(
            "child_session_id".to_string(),
            Value::String(child.session_id.to_string()),
        );
        parameters.insert(
            "child_run_id".to_string(),
            Value::String(child.id.to_string()),
        );
        parameters.insert(
            "child_status".to_string(),
            Value::String(child_status.to_string()),
        );
        if let Some(result) = &child.result {
            parameters.insert("child_result".to_string(), Value::String(result.clone()));
        }
        if let Some(error) = &child.error {
            parameters.insert("child_error".to_string(), Value::String(error.clone()));
        }

        // The resume continues on whatever runner pool served the parent,
        // in the parent's working directory.
        let parent_runs = self.runs.list_by_session(parent_session_id).await?;
        let latest_parent = parent_runs.last();

        let spec = RunSpec {
            run_type: RunType::ResumeSession,
            agent_name: String::new(),
            session_id: Some(parent_session_id),
            parameters,
            // The child's effective scope flows into the resume, so the
            // parent continues with the child's overrides visible.
            scope: child.scope.clone(),
            project_dir: latest_parent.and_then(|r| r.project_dir.clone()),
            parent_session_id: None,
            callback: false,
            demands: latest_parent.map(|r| r.demands.clone()).unwrap_or_default(),
        };

        // Claim-side session gating orders this behind any still-active
        // run on the parent session, so no busy check here.
        self.enqueue_inner(spec, false).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Run> {
        self.runs
            .get(run_id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    pub async fn list_runs(&self) -> Result<Vec<Run>> {
        self.runs.list().await
    }

    pub async fn pending_stops(&self, runner_id: &str) -> Result<Vec<Uuid>> {
        self.runs.pending_stops(runner_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_core::run::FileRunStore;
    use serde_json::json;
    use tempfile::TempDir;

    const RUNNER: &str = "runner-aaa111bbb222";

    async fn create_test_queue() -> (Arc<RunQueue>, TempDir) {
        let temp_dir = TempDir::new().unwrap();

        let agents_dir = temp_dir.path().join("agents");
        tokio::fs::create_dir_all(&agents_dir).await.unwrap();
        tokio::fs::write(
            agents_dir.join("helper.json"),
            serde_json::to_string_pretty(&json!({
                "name": "helper",
                "description": "General helper",
                "prompt": "Help with: ${params.prompt}",
                "config": {
                    "run_ref": "${runtime.run_id}",
                    "mcp_url": "${runner.orchestrator_mcp_url}"
                }
            }))
            .unwrap(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            agents_dir.join("reviewer.json"),
            serde_json::to_string_pretty(&json!({
                "name": "reviewer",
                "description": "Reviews work",
                "config": {
                    "tenant": "${scope.tenant}"
                },
                "config_schema": {"required": ["tenant"]}
            }))
            .unwrap(),
        )
        .await
        .unwrap();

        let runs = Arc::new(
            FileRunStore::new(temp_dir.path().join("runs.json"))
                .await
                .unwrap(),
        );
        let sessions = Arc::new(
            FileSessionStore::new(
                temp_dir.path().join("sessions.json"),
                temp_dir.path().join("session-events"),
            )
            .await
            .unwrap(),
        );
        let queue = Arc::new(RunQueue::new(
            runs,
            sessions,
            BlueprintLibrary::new(&agents_dir),
        ));
        (queue, temp_dir)
    }

    fn start_spec(agent: &str, prompt: &str) -> RunSpec {
        RunSpec::new(RunType::StartSession, agent)
            .with_parameter("prompt", Value::String(prompt.to_string()))
    }

    async fn drive_to_terminal(queue: &RunQueue, run_id: Uuid, status: RunStatus, result: Option<&str>, error: Option<&str>) {
        queue
            .report_status(run_id, RUNNER, RunStatus::Running, None, None)
            .await
            .unwrap();
        queue
            .report_status(
                run_id,
                RUNNER,
                status,
                error.map(String::from),
                result.map(String::from),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn enqueue_resolves_blueprint_and_creates_session() {
        let (queue, _temp) = create_test_queue().await;

        let run = queue.enqueue(start_spec("helper", "fix the bug")).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        // Placeholders resolved against the request context; runner
        // namespace untouched.
        assert_eq!(
            run.resolved_agent_blueprint["prompt"],
            json!("Help with: fix the bug")
        );
        assert_eq!(
            run.resolved_agent_blueprint["config"]["run_ref"],
            json!(run.id.to_string())
        );
        assert_eq!(
            run.resolved_agent_blueprint["config"]["mcp_url"],
            json!("${runner.orchestrator_mcp_url}")
        );

        let session = queue.sessions.get(run.session_id).await.unwrap().unwrap();
        assert_eq!(session.agent_name, "helper");
    }

    #[tokio::test]
    async fn enqueue_unknown_agent_fails() {
        let (queue, _temp) = create_test_queue().await;
        let result = queue.enqueue(start_spec("ghost", "hi")).await;
        assert!(matches!(result, Err(Error::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn enqueue_rejects_malformed_demand_tags() {
        let (queue, _temp) = create_test_queue().await;
        let spec = start_spec("helper", "hi").with_demands(vec!["has space".to_string()]);
        assert!(matches!(
            queue.enqueue(spec).await,
            Err(Error::InvalidInput(_))
        ));

        let spec = start_spec("helper", "hi").with_demands(vec!["".to_string()]);
        assert!(matches!(
            queue.enqueue(spec).await,
            Err(Error::InvalidInput(_))
        ));

        let spec = start_spec("helper", "hi")
            .with_demands(vec!["gpu".to_string(), "env:prod.eu-1".to_string()]);
        assert!(queue.enqueue(spec).await.is_ok());
    }

    #[tokio::test]
    async fn enqueue_fails_when_required_config_unresolved() {
        let (queue, _temp) = create_test_queue().await;

        // reviewer requires config.tenant, fed by ${scope.tenant}.
        let err = queue
            .enqueue(start_spec("reviewer", "check this"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tenant"));

        let spec = start_spec("reviewer", "check this")
            .with_scope(json!({"tenant": "acme"}).as_object().unwrap().clone());
        let run = queue.enqueue(spec).await.unwrap();
        assert_eq!(
            run.resolved_agent_blueprint["config"]["tenant"],
            json!("acme")
        );
    }

    #[tokio::test]
    async fn enqueue_rejects_busy_session() {
        let (queue, _temp) = create_test_queue().await;

        let first = queue.enqueue(start_spec("helper", "one")).await.unwrap();

        let mut spec = start_spec("helper", "two");
        spec.session_id = Some(first.session_id);
        assert!(matches!(
            queue.enqueue(spec).await,
            Err(Error::SessionBusy(_))
        ));

        // Once the first run is terminal the session accepts a resume.
        let filter = ClaimFilter::new(RUNNER, vec![]);
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, first.id, RunStatus::Completed, None, None).await;

        let resume = RunSpec::new(RunType::ResumeSession, "")
            .with_session_id(first.session_id)
            .with_parameter("prompt", json!("continue"));
        let resumed = queue.enqueue(resume).await.unwrap();
        assert_eq!(resumed.agent_name, "helper");
        assert_eq!(resumed.session_id, first.session_id);
    }

    #[tokio::test]
    async fn resume_requires_existing_session() {
        let (queue, _temp) = create_test_queue().await;

        let spec = RunSpec::new(RunType::ResumeSession, "helper")
            .with_parameter("prompt", json!("continue"));
        assert!(matches!(
            queue.enqueue(spec).await,
            Err(Error::InvalidInput(_))
        ));

        let spec = RunSpec::new(RunType::ResumeSession, "helper")
            .with_session_id(Uuid::new_v4())
            .with_parameter("prompt", json!("continue"));
        assert!(matches!(
            queue.enqueue(spec).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn child_scope_merges_over_parent_scope() {
        let (queue, _temp) = create_test_queue().await;

        let parent_spec = start_spec("helper", "parent").with_scope(
            json!({"tenant": "acme", "ctx": "c1"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let parent = queue.enqueue(parent_spec).await.unwrap();

        let child_spec = start_spec("reviewer", "child")
            .with_parent_session(parent.session_id)
            .with_scope(json!({"tenant": "beta"}).as_object().unwrap().clone());
        let child = queue.enqueue(child_spec).await.unwrap();

        assert_eq!(child.scope.get("tenant"), Some(&json!("beta")));
        assert_eq!(child.scope.get("ctx"), Some(&json!("c1")));
        assert_eq!(
            child.resolved_agent_blueprint["config"]["tenant"],
            json!("beta")
        );
    }

    #[tokio::test]
    async fn claim_wakes_on_enqueue() {
        let (queue, _temp) = create_test_queue().await;

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let filter = ClaimFilter::new(RUNNER, vec![]);
                queue.claim(&filter, Duration::from_secs(5)).await.unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let run = queue.enqueue(start_spec("helper", "hi")).await.unwrap();

        let claimed = waiter.await.unwrap().unwrap();
        assert_eq!(claimed.id, run.id);
        assert_eq!(claimed.status, RunStatus::Claimed);
    }

    #[tokio::test]
    async fn claim_times_out_when_nothing_pending() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);
        let started = Instant::now();
        let claimed = queue.claim(&filter, Duration::from_millis(100)).await.unwrap();
        assert!(claimed.is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn report_from_wrong_runner_is_forbidden() {
        let (queue, _temp) = create_test_queue().await;

        let run = queue.enqueue(start_spec("helper", "hi")).await.unwrap();
        let filter = ClaimFilter::new(RUNNER, vec![]);
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();

        let result = queue
            .report_status(run.id, "runner-zzz999", RunStatus::Running, None, None)
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn callback_completion_enqueues_one_resume() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);

        // Parent session with a finished run.
        let parent = queue.enqueue(start_spec("helper", "parent")).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, parent.id, RunStatus::Completed, None, None).await;

        // Child with callback semantics.
        let child_spec = start_spec("helper", "child")
            .with_parent_session(parent.session_id)
            .with_callback(true);
        let child = queue.enqueue(child_spec).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, child.id, RunStatus::Completed, Some("all good"), None).await;

        let parent_runs = queue.runs.list_by_session(parent.session_id).await.unwrap();
        assert_eq!(parent_runs.len(), 2);
        let resume = parent_runs.last().unwrap();
        assert_eq!(resume.run_type, RunType::ResumeSession);
        assert_eq!(resume.status, RunStatus::Pending);
        assert_eq!(resume.agent_name, "helper");
        assert_eq!(
            resume.parameters.get("child_run_id"),
            Some(&json!(child.id.to_string()))
        );
        assert_eq!(
            resume.parameters.get("child_status"),
            Some(&json!("completed"))
        );
        assert_eq!(
            resume.parameters.get("child_result"),
            Some(&json!("all good"))
        );
        let prompt = resume.parameters.get("prompt").unwrap().as_str().unwrap();
        assert!(prompt.contains("all good"));

        // A duplicate terminal report must not enqueue a second resume.
        let (_, outcome) = queue
            .report_status(child.id, RUNNER, RunStatus::Completed, None, None)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::AlreadyTerminal);
        assert_eq!(
            queue.runs.list_by_session(parent.session_id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn callback_failure_carries_error() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);

        let parent = queue.enqueue(start_spec("helper", "parent")).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, parent.id, RunStatus::Completed, None, None).await;

        let child_spec = start_spec("helper", "child")
            .with_parent_session(parent.session_id)
            .with_callback(true);
        let child = queue.enqueue(child_spec).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, child.id, RunStatus::Failed, None, Some("boom")).await;

        let parent_runs = queue.runs.list_by_session(parent.session_id).await.unwrap();
        let resume = parent_runs.last().unwrap();
        assert_eq!(
            resume.parameters.get("child_status"),
            Some(&json!("failed"))
        );
        assert_eq!(resume.parameters.get("child_error"), Some(&json!("boom")));
        assert!(resume.parameters.get("child_result").is_none());
    }

    #[tokio::test]
    async fn stopping_pending_callback_child_still_resumes_parent() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);

        let parent = queue.enqueue(start_spec("helper", "parent")).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, parent.id, RunStatus::Completed, None, None).await;

        let child_spec = start_spec("helper", "child")
            .with_parent_session(parent.session_id)
            .with_callback(true);
        let child = queue.enqueue(child_spec).await.unwrap();

        // Stopped before any runner saw it.
        let stopped = queue.request_stop(child.id).await.unwrap();
        assert_eq!(stopped.status, RunStatus::Stopped);

        let parent_runs = queue.runs.list_by_session(parent.session_id).await.unwrap();
        let resume = parent_runs.last().unwrap();
        assert_eq!(resume.run_type, RunType::ResumeSession);
        assert_eq!(
            resume.parameters.get("child_status"),
            Some(&json!("stopped"))
        );
    }

    #[tokio::test]
    async fn end_to_end_callback_scenario() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);

        // Run A opens a session with scope {proj: x}.
        let a_spec = start_spec("helper", "start work")
            .with_scope(json!({"proj": "x"}).as_object().unwrap().clone());
        let a = queue.enqueue(a_spec).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, a.id, RunStatus::Completed, None, None).await;

        // Run B: child of A's session, overriding scope, callback on.
        let b_spec = start_spec("helper", "delegate")
            .with_parent_session(a.session_id)
            .with_scope(json!({"proj": "y"}).as_object().unwrap().clone())
            .with_callback(true);
        let b = queue.enqueue(b_spec).await.unwrap();
        assert_eq!(b.scope.get("proj"), Some(&json!("y")));

        let claimed_b = queue
            .claim(&filter, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed_b.id, b.id);
        drive_to_terminal(&queue, b.id, RunStatus::Completed, Some("done: 42"), None).await;

        // Resume C lands on A's session carrying B's result and B's
        // effective scope.
        let c = queue
            .claim(&filter, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.session_id, a.session_id);
        assert_eq!(c.run_type, RunType::ResumeSession);
        assert_eq!(c.scope.get("proj"), Some(&json!("y")));
        assert_eq!(c.parameters.get("child_result"), Some(&json!("done: 42")));
        assert_eq!(
            c.parameters.get("child_session_id"),
            Some(&json!(b.session_id.to_string()))
        );
    }

    #[tokio::test]
    async fn resume_waits_for_parent_session_to_go_idle() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);

        // Parent run is still RUNNING when the callback child finishes.
        let parent = queue.enqueue(start_spec("helper", "parent")).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        queue
            .report_status(parent.id, RUNNER, RunStatus::Running, None, None)
            .await
            .unwrap();

        let child_spec = start_spec("helper", "child")
            .with_parent_session(parent.session_id)
            .with_callback(true);
        let child = queue.enqueue(child_spec).await.unwrap();
        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        drive_to_terminal(&queue, child.id, RunStatus::Completed, None, None).await;

        // The resume is durably queued but gated behind the parent run.
        assert_eq!(
            queue.runs.list_by_session(parent.session_id).await.unwrap().len(),
            2
        );
        assert!(queue
            .claim(&filter, Duration::from_millis(50))
            .await
            .unwrap()
            .is_none());

        queue
            .report_status(parent.id, RUNNER, RunStatus::Completed, None, None)
            .await
            .unwrap();
        let resume = queue
            .claim(&filter, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resume.run_type, RunType::ResumeSession);
    }

    #[tokio::test]
    async fn session_status_follows_run_lifecycle() {
        let (queue, _temp) = create_test_queue().await;
        let filter = ClaimFilter::new(RUNNER, vec![]);

        let run = queue.enqueue(start_spec("helper", "hi")).await.unwrap();
        assert_eq!(
            queue.sessions.get(run.session_id).await.unwrap().unwrap().status,
            SessionStatus::Pending
        );

        queue.claim(&filter, Duration::from_millis(10)).await.unwrap().unwrap();
        queue
            .report_status(run.id, RUNNER, RunStatus::Running, None, None)
            .await
            .unwrap();
        assert_eq!(
            queue.sessions.get(run.session_id).await.unwrap().unwrap().status,
            SessionStatus::Running
        );

        queue
            .report_status(run.id, RUNNER, RunStatus::Failed, Some("crash".to_string()), None)
            .await
            .unwrap();
        assert_eq!(
            queue.sessions.get(run.session_id).await.unwrap().unwrap().status,
            SessionStatus::Error
        );
    }
}
