//! Workflow executor clients.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use flowchat_core::{ExecutionHandle, ExecutionRequest, ExecutionStatus, WorkflowExecutor};

/// Talks to an external execution service over HTTP.
///
/// `POST {base}/executions` starts a run; `GET {base}/executions/{id}` reports its status.
pub struct HttpWorkflowExecutor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpWorkflowExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl WorkflowExecutor for HttpWorkflowExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        debug!(workflow_id = %request.workflow_id, action_id = %request.action_id, "Starting workflow execution");
        let response = self
            .authorize(self.client.post(format!("{}/executions", self.base_url)))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .context("Execution service request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Execution service returned {}: {}", status, body);
        }
        response.json().await.context("Failed to parse execution handle")
    }

    async fn status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let response = self
            .authorize(self.client.get(format!("{}/executions/{}", self.base_url, execution_id)))
            .timeout(self.timeout)
            .send()
            .await
            .context("Execution status request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Execution service returned {} for {}: {}", status, execution_id, body);
        }
        response.json().await.context("Failed to parse execution status")
    }
}

/// In-process executor that records requests and replays scripted statuses.
///
/// Each execution starts with the statuses given to [`RecordingExecutor::with_statuses`];
/// they are consumed one per `status` call and the last one repeats.
#[derive(Default)]
pub struct RecordingExecutor {
    requests: Mutex<Vec<ExecutionRequest>>,
    script: Vec<ExecutionStatus>,
    statuses: Mutex<HashMap<String, VecDeque<ExecutionStatus>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(mut self, statuses: Vec<ExecutionStatus>) -> Self {
        self.script = statuses;
        self
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl WorkflowExecutor for RecordingExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.push(request);
        let execution_id = format!("exec-{}", requests.len());
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(execution_id.clone(), self.script.iter().cloned().collect());
        Ok(ExecutionHandle { execution_id })
    }

    async fn status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let mut statuses = self.statuses.lock().unwrap_or_else(|e| e.into_inner());
        let queue = statuses
            .get_mut(execution_id)
            .with_context(|| format!("unknown execution {execution_id}"))?;
        let status = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        Ok(status.unwrap_or(ExecutionStatus::Running))
    }
}

/// Stands in when no execution service is configured; every call fails.
pub struct UnconfiguredExecutor;

#[async_trait]
impl WorkflowExecutor for UnconfiguredExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        anyhow::bail!("no execution service configured for action {}", request.action_id)
    }

    async fn status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        anyhow::bail!("no execution service configured (execution {execution_id})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_service() -> String {
        let app = Router::new()
            .route(
                "/executions",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["action_id"], "book_demo");
                    Json(json!({"execution_id": "remote-7"}))
                }),
            )
            .route(
                "/executions/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "remote-7" {
                        Json(json!({"status": "completed", "output": {"confirmation": "DEMO-42"}}))
                    } else {
                        Json(json!({"status": "failed", "error": "no such execution"}))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            workflow_id: "wf".into(),
            params: serde_json::Map::new(),
            session_id: "s1".into(),
            action_id: "book_demo".into(),
        }
    }

    #[tokio::test]
    async fn http_executor_round_trip() {
        let executor = HttpWorkflowExecutor::new(spawn_service().await);
        let handle = executor.execute(request()).await.unwrap();
        assert_eq!(handle.execution_id, "remote-7");
        match executor.status("remote-7").await.unwrap() {
            ExecutionStatus::Completed { output } => assert_eq!(output["confirmation"], "DEMO-42"),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(matches!(executor.status("other").await.unwrap(), ExecutionStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn recording_executor_replays_script() {
        let executor = RecordingExecutor::new().with_statuses(vec![
            ExecutionStatus::Running,
            ExecutionStatus::Completed { output: json!({"ok": true}) },
        ]);
        let handle = executor.execute(request()).await.unwrap();
        assert_eq!(handle.execution_id, "exec-1");
        assert_eq!(executor.status("exec-1").await.unwrap(), ExecutionStatus::Running);
        assert!(executor.status("exec-1").await.unwrap().is_terminal());
        assert!(executor.status("exec-1").await.unwrap().is_terminal());
        assert!(executor.status("missing").await.is_err());
        assert_eq!(executor.requests().len(), 1);
    }

    #[tokio::test]
    async fn unconfigured_executor_refuses() {
        let err = UnconfiguredExecutor.execute(request()).await.unwrap_err();
        assert!(err.to_string().contains("no execution service"));
    }
}
