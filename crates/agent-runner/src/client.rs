//! HTTP client for the coordinator API
//!
//! Every runner-side component talks to the coordinator through the
//! [`CoordinatorApi`] trait so tests can substitute an in-memory fake.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use ao_core::api::{
    AgentSummary, BindSessionRequest, ClaimedRun, DeregisterRequest, EnqueueRunRequest,
    EnqueueRunResponse, HeartbeatRequest, HeartbeatResponse, RegisterRunnerRequest,
    RegisterRunnerResponse, ReportStatusRequest, RunnerSummary, SessionEventRequest,
};

use crate::error::{Result, RunnerError};

#[derive(Debug, Clone)]
pub struct RunnerCredentials {
    pub runner_id: String,
    pub token: String,
}

#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Register (or re-register) and remember the issued credentials.
    async fn register(&self, req: &RegisterRunnerRequest) -> Result<RunnerSummary>;

    /// Long-poll for a run. `Ok(None)` means the poll timed out empty.
    async fn claim(&self, timeout_secs: u64, require_tagged: bool) -> Result<Option<ClaimedRun>>;

    async fn report_status(&self, run_id: Uuid, req: &ReportStatusRequest) -> Result<()>;

    async fn heartbeat(&self) -> Result<HeartbeatResponse>;

    async fn deregister(&self) -> Result<()>;

    async fn bind_session(&self, session_id: Uuid, req: &BindSessionRequest) -> Result<Value>;

    async fn append_event(&self, session_id: Uuid, req: &SessionEventRequest) -> Result<()>;

    async fn patch_metadata(&self, session_id: Uuid, patch: &Map<String, Value>) -> Result<Value>;

    async fn get_session(&self, session_id: Uuid) -> Result<Value>;

    async fn list_agents(&self) -> Result<Vec<AgentSummary>>;

    async fn enqueue_run(&self, req: &EnqueueRunRequest) -> Result<EnqueueRunResponse>;

    fn runner_id(&self) -> Option<String>;
}

pub struct HttpCoordinatorClient {
    client: Client,
    base_url: String,
    auth: RwLock<Option<RunnerCredentials>>,
}

impl HttpCoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = {
            let guard = self.auth.read().unwrap_or_else(|e| e.into_inner());
            guard
                .as_ref()
                .map(|c| c.token.clone())
                .ok_or(RunnerError::NotRegistered)?
        };
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| RunnerError::transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body).unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        });
        Err(RunnerError::api(status.as_u16(), message))
    }

    async fn json_body<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| RunnerError::transport(format!("Invalid response body: {e}")))
    }
}

/// Coordinator errors arrive as `{"error": "…"}`; fall back to the raw
/// body when they do not.
fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl CoordinatorApi for HttpCoordinatorClient {
    async fn register(&self, req: &RegisterRunnerRequest) -> Result<RunnerSummary> {
        let response = self
            .send(self.client.post(self.url("/runner/register")).json(req))
            .await?;
        let body: RegisterRunnerResponse = self.json_body(response).await?;
        let creds = RunnerCredentials {
            runner_id: body.runner.runner_id.clone(),
            token: body.token,
        };
        *self.auth.write().unwrap_or_else(|e| e.into_inner()) = Some(creds);
        Ok(body.runner)
    }

    async fn claim(&self, timeout_secs: u64, require_tagged: bool) -> Result<Option<ClaimedRun>> {
        let builder = self
            .authed(Method::GET, "/runner/runs")?
            .query(&[("timeoutSecs", timeout_secs.to_string())])
            .query(&[("requireTagged", require_tagged.to_string())]);
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(self.json_body(response).await?))
    }

    async fn report_status(&self, run_id: Uuid, req: &ReportStatusRequest) -> Result<()> {
        let builder = self
            .authed(Method::POST, &format!("/runs/{run_id}/status"))?
            .json(req);
        self.send(builder).await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<HeartbeatResponse> {
        let runner_id = self.runner_id().ok_or(RunnerError::NotRegistered)?;
        let builder = self
            .authed(Method::POST, "/runner/heartbeat")?
            .json(&HeartbeatRequest { runner_id });
        let response = self.send(builder).await?;
        self.json_body(response).await
    }

    async fn deregister(&self) -> Result<()> {
        let runner_id = self.runner_id().ok_or(RunnerError::NotRegistered)?;
        let builder = self
            .authed(Method::POST, "/runner/deregister")?
            .json(&DeregisterRequest { runner_id });
        self.send(builder).await?;
        Ok(())
    }

    async fn bind_session(&self, session_id: Uuid, req: &BindSessionRequest) -> Result<Value> {
        let builder = self
            .authed(Method::POST, &format!("/sessions/{session_id}/bind"))?
            .json(req);
        let response = self.send(builder).await?;
        self.json_body(response).await
    }

    async fn append_event(&self, session_id: Uuid, req: &SessionEventRequest) -> Result<()> {
        let builder = self
            .authed(Method::POST, &format!("/sessions/{session_id}/events"))?
            .json(req);
        self.send(builder).await?;
        Ok(())
    }

    async fn patch_metadata(&self, session_id: Uuid, patch: &Map<String, Value>) -> Result<Value> {
        let builder = self
            .authed(Method::PATCH, &format!("/sessions/{session_id}/metadata"))?
            .json(patch);
        let response = self.send(builder).await?;
        self.json_body(response).await
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Value> {
        let builder = self.authed(Method::GET, &format!("/sessions/{session_id}"))?;
        let response = self.send(builder).await?;
        self.json_body(response).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentSummary>> {
        let builder = self.authed(Method::GET, "/agents")?;
        let response = self.send(builder).await?;
        self.json_body(response).await
    }

    async fn enqueue_run(&self, req: &EnqueueRunRequest) -> Result<EnqueueRunResponse> {
        let builder = self.authed(Method::POST, "/runs")?.json(req);
        let response = self.send(builder).await?;
        self.json_body(response).await
    }

    fn runner_id(&self) -> Option<String> {
        self.auth
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.runner_id.clone())
    }
}

/// Exponential backoff with jitter for retrying coordinator calls.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base_ms: u64 = 500;
    let capped = base_ms.saturating_mul(1u64 << attempt.min(6)).min(15_000);
    let jitter = rand::thread_rng().gen_range(0..capped / 2 + 1);
    Duration::from_millis(capped + jitter)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_comes_from_error_field() {
        assert_eq!(
            extract_error_message(r#"{"error": "Session busy"}"#),
            Some("Session busy".to_string())
        );
        assert_eq!(extract_error_message("plain text"), None);
        assert_eq!(extract_error_message(r#"{"detail": "other"}"#), None);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(0);
        assert!(first >= Duration::from_millis(500));
        assert!(first < Duration::from_millis(1000));

        // Attempt numbers past the cap stay bounded.
        for attempt in [6, 10, 30] {
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(15_000));
            assert!(delay <= Duration::from_millis(22_501));
        }
    }

    #[test]
    fn unregistered_client_cannot_build_authed_requests() {
        let client = HttpCoordinatorClient::new("http://localhost:1/");
        assert_eq!(client.base_url, "http://localhost:1");
        assert!(client.runner_id().is_none());
        assert!(matches!(
            client.authed(Method::GET, "/agents"),
            Err(RunnerError::NotRegistered)
        ));
    }
}
