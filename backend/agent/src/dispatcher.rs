//! Action dispatch and follow-up delivery.
//!
//! An accepted action starts an external workflow execution and leaves a
//! pending marker behind. Polling the marker later turns the execution's
//! output into one assistant message, appended to history and stashed for
//! the client to pick up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use flowchat_core::{
    ChatError, ChatMessage, ChatNodeConfig, Clock, ExecutionHandle, ExecutionRequest,
    ExecutionStatus, ProviderRequest, Role, Session, SystemClock, ToolConfig, WorkflowExecutor,
};
use flowchat_logging::{ChatEvent, ChatEventLogger};
use flowchat_memory::{
    ConfigSnapshots, FollowUpMessage, FollowUpStash, PendingExecution, PendingExecutions,
    SessionStore,
};
use flowchat_providers::ProviderSet;

use crate::workflows::WorkflowCatalog;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_POLLS: u32 = 30;
/// Prior messages shown to the model when summarizing an execution result.
pub const FOLLOW_UP_HISTORY: usize = 6;

const FOLLOW_UP_INSTRUCTION: &str = "An action you started for the user has finished. \
Tell the user the outcome in one or two friendly sentences, using only the action result below. \
Do not output JSON.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Still running; poll again later.
    Rescheduled { polls: u32 },
    /// The follow-up message was appended and stashed.
    Completed { message: String },
    /// Nothing will be delivered for this execution.
    Abandoned { reason: String },
}

impl PollOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, PollOutcome::Rescheduled { .. })
    }
}

pub struct ActionDispatcher {
    executor: Arc<dyn WorkflowExecutor>,
    store: Arc<dyn SessionStore>,
    providers: ProviderSet,
    workflows: Arc<dyn WorkflowCatalog>,
    snapshots: ConfigSnapshots,
    pending: PendingExecutions,
    follow_ups: FollowUpStash,
    clock: Arc<dyn Clock>,
    max_polls: u32,
}

impl ActionDispatcher {
    pub fn new(
        executor: Arc<dyn WorkflowExecutor>,
        store: Arc<dyn SessionStore>,
        providers: ProviderSet,
        workflows: Arc<dyn WorkflowCatalog>,
    ) -> Self {
        Self {
            executor,
            store,
            providers,
            workflows,
            snapshots: ConfigSnapshots::default(),
            pending: PendingExecutions::default(),
            follow_ups: FollowUpStash::default(),
            clock: Arc::new(SystemClock),
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls.max(1);
        self
    }

    pub fn with_pending(mut self, pending: PendingExecutions) -> Self {
        self.pending = pending;
        self
    }

    /// Share the orchestrator's session snapshots so follow-ups use the same chat node config.
    pub fn with_snapshots(mut self, snapshots: ConfigSnapshots) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn snapshots(&self) -> &ConfigSnapshots {
        &self.snapshots
    }

    pub fn pending(&self) -> &PendingExecutions {
        &self.pending
    }

    pub fn follow_ups(&self) -> &FollowUpStash {
        &self.follow_ups
    }

    /// Start the execution behind `action_id` and record a pending marker.
    pub async fn dispatch(
        &self,
        session: &Session,
        config: &ChatNodeConfig,
        action_id: &str,
        params: Map<String, Value>,
    ) -> Result<ExecutionHandle, ChatError> {
        if config.find_action(action_id).is_none() {
            return Err(ChatError::Dispatch(format!("action '{}' is not configured", action_id)));
        }

        let params_json = Value::Object(params.clone()).to_string();
        let request = ExecutionRequest {
            workflow_id: session.workflow_id.clone(),
            params,
            session_id: session.id.clone(),
            action_id: action_id.to_string(),
        };
        let handle = self
            .executor
            .execute(request)
            .await
            .map_err(|e| ChatError::Dispatch(format!("{:#}", e)))?;

        self.pending.insert(PendingExecution {
            execution_id: handle.execution_id.clone(),
            action_id: action_id.to_string(),
            workflow_id: session.workflow_id.clone(),
            session_id: session.id.clone(),
            created_at: self.clock.now(),
            polls: 0,
        });
        ChatEventLogger::log_event(
            &session.id,
            ChatEvent::ActionDispatched {
                action_id: action_id.to_string(),
                execution_id: handle.execution_id.clone(),
                params_json,
            },
        );
        Ok(handle)
    }

    /// Check one execution. Safe to call repeatedly: a completion is delivered at most once.
    pub async fn poll(&self, execution_id: &str) -> PollOutcome {
        let Some(marker) = self.pending.record_poll(execution_id) else {
            return self.abandon(execution_id, None, "no pending marker");
        };
        if marker.polls > self.max_polls {
            self.pending.take(execution_id);
            return self.abandon(execution_id, Some(&marker.session_id), "poll budget exhausted");
        }

        let status = match self.executor.status(execution_id).await {
            Ok(status) => status,
            Err(e) => {
                self.pending.take(execution_id);
                return self.abandon(
                    execution_id,
                    Some(&marker.session_id),
                    &format!("status check failed: {:#}", e),
                );
            }
        };

        match status {
            ExecutionStatus::Pending | ExecutionStatus::Running => {
                debug!(execution_id, polls = marker.polls, "Execution still running");
                PollOutcome::Rescheduled { polls: marker.polls }
            }
            ExecutionStatus::Failed { error } => {
                self.pending.take(execution_id);
                let reason = format!("execution failed: {}", error.as_deref().unwrap_or("no detail"));
                self.abandon(execution_id, Some(&marker.session_id), &reason)
            }
            ExecutionStatus::Completed { output } => {
                let Some(marker) = self.pending.take(execution_id) else {
                    return self.abandon(execution_id, None, "already delivered");
                };
                match self.deliver(&marker, &output).await {
                    Ok(message) => PollOutcome::Completed { message },
                    Err(e) => self.abandon(execution_id, Some(&marker.session_id), &format!("{:#}", e)),
                }
            }
        }
    }

    async fn deliver(&self, marker: &PendingExecution, output: &Value) -> Result<String> {
        let result = describe_output(output).context("execution returned no output")?;
        let config = self
            .snapshots
            .get(&marker.session_id)
            .or_else(|| self.workflows.chat_node(&marker.workflow_id))
            .with_context(|| format!("workflow '{}' has no chat node", marker.workflow_id))?;

        let history = self.store.history(&marker.session_id).await?;
        let recent = history.len().saturating_sub(FOLLOW_UP_HISTORY);

        let mut messages = Vec::with_capacity(FOLLOW_UP_HISTORY + 2);
        messages.push(ChatMessage::system(format!(
            "{}\n\n{}",
            config.system_prompt, FOLLOW_UP_INSTRUCTION
        )));
        messages.extend(
            history[recent..]
                .iter()
                .filter(|m| m.role != Role::System)
                .map(ChatMessage::from),
        );
        messages.push(ChatMessage::user(format!(
            "Action result ({}):\n{}",
            marker.action_id, result
        )));

        let tools = ToolConfig::default();
        let (kind, adapter) = self.providers.resolve(&config.model, &tools)?;
        let request = ProviderRequest {
            model: config.model.clone(),
            messages,
            params: config.params.clone(),
            tools,
        };

        let started = Instant::now();
        let reply = adapter.complete(&request).await?;
        let usage = reply.usage.unwrap_or_default();
        ChatEventLogger::log_event(
            &marker.session_id,
            ChatEvent::ProviderCall {
                provider: kind.label().to_string(),
                model: config.model.clone(),
                latency_ms: started.elapsed().as_millis() as u64,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                streamed: false,
            },
        );

        let message = reply.text.trim().to_string();
        if message.is_empty() {
            anyhow::bail!("provider returned an empty follow-up");
        }

        self.store.append(&marker.session_id, Role::Assistant, &message).await?;
        self.follow_ups.push(
            &marker.session_id,
            FollowUpMessage {
                execution_id: marker.execution_id.clone(),
                action_id: marker.action_id.clone(),
                message: message.clone(),
                created_at: self.clock.now(),
            },
        );
        ChatEventLogger::log_event(
            &marker.session_id,
            ChatEvent::FollowUpDelivered {
                execution_id: marker.execution_id.clone(),
                action_id: marker.action_id.clone(),
            },
        );
        info!(execution_id = %marker.execution_id, session_id = %marker.session_id, "[ActionDispatcher] Follow-up delivered");
        Ok(message)
    }

    fn abandon(&self, execution_id: &str, session_id: Option<&str>, reason: &str) -> PollOutcome {
        warn!(execution_id, reason, "[ActionDispatcher] Follow-up abandoned");
        if let Some(session_id) = session_id {
            ChatEventLogger::log_event(
                session_id,
                ChatEvent::FollowUpAbandoned {
                    execution_id: execution_id.to_string(),
                    reason: reason.to_string(),
                },
            );
        }
        PollOutcome::Abandoned { reason: reason.to_string() }
    }
}

/// Render execution output for the summarizing prompt. `None` when there is nothing to say.
fn describe_output(output: &Value) -> Option<String> {
    match output {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) if map.is_empty() => None,
        Value::Array(items) if items.is_empty() => None,
        other => serde_json::to_string_pretty(other).ok(),
    }
}

/// Polls pending executions on a fixed interval until each one settles.
#[derive(Clone)]
pub struct FollowUpScheduler {
    dispatcher: Arc<ActionDispatcher>,
    interval: Duration,
}

impl FollowUpScheduler {
    pub fn new(dispatcher: Arc<ActionDispatcher>, interval: Duration) -> Self {
        Self { dispatcher, interval }
    }

    pub fn schedule(&self, execution_id: String) -> JoinHandle<PollOutcome> {
        let dispatcher = self.dispatcher.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            // first tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let outcome = dispatcher.poll(&execution_id).await;
                if outcome.is_final() {
                    return outcome;
                }
            }
        })
    }
}
