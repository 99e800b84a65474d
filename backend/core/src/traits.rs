use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::chat_node::{ModelParams, ToolConfig};
use crate::error::ProviderError;
use crate::reply::{CanonicalReply, StreamDelta};
use crate::types::ChatMessage;

/// Incremental reply stream produced by an adapter.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ProviderError>> + Send>>;

/// Request handed to a provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    /// System message first, then history, then the current user message.
    pub messages: Vec<ChatMessage>,
    pub params: ModelParams,
    pub tools: ToolConfig,
}

/// One LLM vendor integration.
///
/// Every adapter turns a canonical message list into its own wire format and
/// decodes the answer back into a [`CanonicalReply`] (or a stream of deltas).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name used in logs and errors (e.g. "openai", "openrouter").
    fn name(&self) -> &str;

    /// Buffered completion.
    async fn complete(&self, request: &ProviderRequest) -> Result<CanonicalReply, ProviderError>;

    /// Streaming completion. The stream yields text fragments in receipt order.
    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, ProviderError>;
}

/// Request to start a workflow execution on behalf of a chat action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    pub workflow_id: String,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub session_id: String,
    pub action_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionHandle {
    pub execution_id: String,
}

/// Lifecycle of an external workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed {
        #[serde(default)]
        output: serde_json::Value,
    },
    Failed {
        #[serde(default)]
        error: Option<String>,
    },
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed { .. } | ExecutionStatus::Failed { .. })
    }
}

/// The workflow execution engine. It lives outside this workspace.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> anyhow::Result<ExecutionHandle>;

    /// Must be safe to call repeatedly for the same id.
    async fn status(&self, execution_id: &str) -> anyhow::Result<ExecutionStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_is_tagged_by_status() {
        let s: ExecutionStatus = serde_json::from_value(serde_json::json!({
            "status": "completed",
            "output": {"booking_id": 42}
        }))
        .unwrap();
        assert!(s.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        let failed: ExecutionStatus =
            serde_json::from_value(serde_json::json!({"status": "failed"})).unwrap();
        assert_eq!(failed, ExecutionStatus::Failed { error: None });
    }
}
