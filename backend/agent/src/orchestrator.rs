//! Chat turn orchestration.
//!
//! A turn flows through input checks, session resolution, rate limiting,
//! context assembly and one provider call. The reply is then interpreted as
//! either a plain message or an action that gets dispatched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use flowchat_core::{
    ChatError, ChatNodeConfig, Citation, Clock, PageContext, ProviderAdapter, ProviderRequest,
    Role, Session, SystemClock,
};
use flowchat_logging::{ChatEvent, ChatEventLogger};
use flowchat_memory::{ConfigSnapshots, FollowUpMessage, RateLimiter, SessionStore};
use flowchat_providers::{ProviderKind, ProviderSet};

use crate::context_window::ContextBuilder;
use crate::dispatcher::{ActionDispatcher, FollowUpScheduler, PollOutcome};
use crate::input::{check_origin, sanitize_message, validate_message};
use crate::interpreter::{interpret, Interpretation};
use crate::streaming::{
    RelayOutcome, StreamFrame, StreamRelay, DEFAULT_STREAM_TIMEOUT, STREAMING_WITH_ACTIONS_MESSAGE,
};
use crate::workflows::WorkflowCatalog;

const STREAM_BUFFER: usize = 64;

/// Inbound turn payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub page_context: Option<PageContext>,
    /// Widget-opening greeting; answered but the user message is not stored.
    #[serde(default)]
    pub is_initial: bool,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Transport-level facts about a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub workflow_id: String,
    pub origin: Option<String>,
    pub client_addr: Option<String>,
}

impl TurnContext {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self { workflow_id: workflow_id.into(), ..Default::default() }
    }
}

/// Buffered turn result as sent to the widget.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnReply {
    Message {
        display_message: String,
        message: String,
        session_id: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        citations: Vec<Citation>,
    },
    Action {
        display_message: String,
        /// The model's reply including the directive.
        message: String,
        session_id: String,
        action_id: String,
        has_pending_result: bool,
        execution_id: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        citations: Vec<Citation>,
    },
}

impl TurnReply {
    pub fn session_id(&self) -> &str {
        match self {
            TurnReply::Message { session_id, .. } | TurnReply::Action { session_id, .. } => session_id,
        }
    }

    pub fn display_message(&self) -> &str {
        match self {
            TurnReply::Message { display_message, .. } | TurnReply::Action { display_message, .. } => {
                display_message
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnPolicy {
    /// Hosting site origins. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    pub stream_timeout: Duration,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self { allowed_origins: Vec::new(), stream_timeout: DEFAULT_STREAM_TIMEOUT }
    }
}

/// A turn that passed the checks and has a session and config snapshot.
struct OpenedTurn {
    session: Session,
    config: Arc<ChatNodeConfig>,
    message: String,
}

struct PreparedCall {
    kind: ProviderKind,
    adapter: Arc<dyn ProviderAdapter>,
    request: ProviderRequest,
}

pub struct ChatOrchestrator {
    store: Arc<dyn SessionStore>,
    providers: ProviderSet,
    workflows: Arc<dyn WorkflowCatalog>,
    limiter: RateLimiter,
    snapshots: ConfigSnapshots,
    dispatcher: Arc<ActionDispatcher>,
    scheduler: Option<FollowUpScheduler>,
    policy: TurnPolicy,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        providers: ProviderSet,
        workflows: Arc<dyn WorkflowCatalog>,
        dispatcher: Arc<ActionDispatcher>,
    ) -> Self {
        Self::with_clock(store, providers, workflows, dispatcher, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SessionStore>,
        providers: ProviderSet,
        workflows: Arc<dyn WorkflowCatalog>,
        dispatcher: Arc<ActionDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(clock),
            snapshots: dispatcher.snapshots().clone(),
            store,
            providers,
            workflows,
            dispatcher,
            scheduler: None,
            policy: TurnPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TurnPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll dispatched executions in the background every `interval`.
    pub fn with_follow_up_polling(mut self, interval: Duration) -> Self {
        self.scheduler = Some(FollowUpScheduler::new(self.dispatcher.clone(), interval));
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Run a buffered turn.
    pub async fn handle_turn(&self, ctx: &TurnContext, request: TurnRequest) -> Result<TurnReply, ChatError> {
        let session_hint = request.session_id.clone();
        let result = self.run_buffered(ctx, request).await;
        if let Err(e) = &result {
            report_failure(session_hint.as_deref(), e);
        }
        result
    }

    /// Run a streaming turn. Checks that fail before the stream opens are
    /// returned as errors; everything after that travels as frames.
    pub async fn handle_stream(
        &self,
        ctx: &TurnContext,
        request: TurnRequest,
    ) -> Result<ReceiverStream<StreamFrame>, ChatError> {
        let session_hint = request.session_id.clone();
        let result = self.open_stream(ctx, request).await;
        if let Err(e) = &result {
            report_failure(session_hint.as_deref(), e);
        }
        result
    }

    /// Hand out the completion messages stashed for a session.
    pub fn take_follow_ups(&self, session_id: &str) -> Vec<FollowUpMessage> {
        self.dispatcher.follow_ups().drain(session_id)
    }

    pub async fn poll(&self, execution_id: &str) -> PollOutcome {
        self.dispatcher.poll(execution_id).await
    }

    async fn run_buffered(&self, ctx: &TurnContext, request: TurnRequest) -> Result<TurnReply, ChatError> {
        let turn = self.open_turn(ctx, &request, false).await?;
        let call = self.prepare_call(ctx, &request, &turn).await?;
        let session_id = turn.session.id.clone();

        let started = Instant::now();
        let reply = match call.adapter.complete(&call.request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(session_id = %session_id, provider = call.kind.label(), error = %e, "Provider call failed");
                ChatEventLogger::log_event(
                    &session_id,
                    ChatEvent::ProviderFailed {
                        provider: call.kind.label().to_string(),
                        kind: e.kind().to_string(),
                        detail: e.to_string(),
                    },
                );
                return Err(e.into());
            }
        };
        let usage = reply.usage.unwrap_or_default();
        ChatEventLogger::log_event(
            &session_id,
            ChatEvent::ProviderCall {
                provider: call.kind.label().to_string(),
                model: turn.config.model.clone(),
                latency_ms: started.elapsed().as_millis() as u64,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                streamed: false,
            },
        );

        match interpret(reply, &turn.config.actions) {
            Interpretation::Message { text, citations } => {
                self.persist(&session_id, Role::Assistant, &text).await?;
                Ok(TurnReply::Message { display_message: text.clone(), message: text, session_id, citations })
            }
            Interpretation::Action { display_text, action_id, params, confidence, citations, raw_text } => {
                debug!(session_id = %session_id, action_id = %action_id, confidence, "Action directive accepted");
                let handle = self.dispatcher.dispatch(&turn.session, &turn.config, &action_id, params).await?;
                self.persist(&session_id, Role::Assistant, &display_text).await?;
                if let Some(scheduler) = &self.scheduler {
                    scheduler.schedule(handle.execution_id.clone());
                }
                Ok(TurnReply::Action {
                    display_message: display_text,
                    message: raw_text,
                    session_id,
                    action_id,
                    has_pending_result: true,
                    execution_id: handle.execution_id,
                    citations,
                })
            }
        }
    }

    async fn open_stream(
        &self,
        ctx: &TurnContext,
        request: TurnRequest,
    ) -> Result<ReceiverStream<StreamFrame>, ChatError> {
        let turn = self.open_turn(ctx, &request, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let relay = StreamRelay::new(self.store.clone(), turn.session.id.clone(), self.policy.stream_timeout);

        if !turn.config.actions.is_empty() {
            warn!(workflow_id = %ctx.workflow_id, "Streaming requested for a chat node with actions");
            tokio::spawn(relay.reject(tx, STREAMING_WITH_ACTIONS_MESSAGE));
            return Ok(ReceiverStream::new(rx));
        }

        let PreparedCall { kind, adapter, request: provider_request } =
            self.prepare_call(ctx, &request, &turn).await?;
        let session_id = turn.session.id.clone();
        let model = turn.config.model.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let open = async move { adapter.stream(&provider_request).await };
            match relay.run(open, tx).await {
                RelayOutcome::Completed { .. } => ChatEventLogger::log_event(
                    &session_id,
                    ChatEvent::ProviderCall {
                        provider: kind.label().to_string(),
                        model,
                        latency_ms: started.elapsed().as_millis() as u64,
                        prompt_tokens: 0,
                        completion_tokens: 0,
                        total_tokens: 0,
                        streamed: true,
                    },
                ),
                RelayOutcome::Failed(e) => ChatEventLogger::log_event(
                    &session_id,
                    ChatEvent::ProviderFailed {
                        provider: kind.label().to_string(),
                        kind: e.kind().to_string(),
                        detail: e.to_string(),
                    },
                ),
                RelayOutcome::TimedOut => ChatEventLogger::log_event(
                    &session_id,
                    ChatEvent::ProviderFailed {
                        provider: kind.label().to_string(),
                        kind: "timeout".to_string(),
                        detail: "stream exceeded its time budget".to_string(),
                    },
                ),
                RelayOutcome::Rejected => {}
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Input checks, chat node lookup, session resolution and config snapshot.
    async fn open_turn(&self, ctx: &TurnContext, request: &TurnRequest, stream: bool) -> Result<OpenedTurn, ChatError> {
        validate_message(&request.message)?;
        check_origin(ctx.origin.as_deref(), &self.policy.allowed_origins)?;
        let message = sanitize_message(&request.message);
        if message.is_empty() {
            return Err(ChatError::Validation("Message cannot be empty.".into()));
        }

        let current = self.workflows.chat_node(&ctx.workflow_id).ok_or_else(|| {
            ChatError::Configuration(format!("workflow '{}' has no chat node", ctx.workflow_id))
        })?;
        let session = self
            .store
            .open(&ctx.workflow_id, request.session_id.as_deref())
            .await
            .map_err(storage_error)?;
        let config = self.snapshots.resolve(&session.id, &current);

        ChatEventLogger::log_event(
            &session.id,
            ChatEvent::TurnStarted {
                workflow_id: ctx.workflow_id.clone(),
                stream,
                message_chars: message.chars().count(),
            },
        );
        Ok(OpenedTurn { session, config, message })
    }

    /// Rate check, context assembly, provider selection, then the user message is stored.
    async fn prepare_call(
        &self,
        ctx: &TurnContext,
        request: &TurnRequest,
        turn: &OpenedTurn,
    ) -> Result<PreparedCall, ChatError> {
        let session_id = &turn.session.id;
        let allowed = self.limiter.can_send_message(
            session_id,
            turn.config.rate_limit.as_ref(),
            ctx.client_addr.as_deref(),
        );
        if !allowed {
            ChatEventLogger::log_event(session_id, ChatEvent::RateLimited { client_addr: ctx.client_addr.clone() });
            return Err(ChatError::RateLimited);
        }

        let history = self.store.history(session_id).await.map_err(storage_error)?;
        let messages = ContextBuilder::build(
            &turn.config,
            &history,
            request.page_context.as_ref().filter(|p| !p.is_empty()),
            &turn.message,
            self.store.max_history(),
        );

        let (kind, adapter) = self
            .providers
            .resolve(&turn.config.model, &turn.config.tools)
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        if !request.is_initial {
            self.persist(session_id, Role::User, &turn.message).await?;
        }

        Ok(PreparedCall {
            kind,
            adapter,
            request: ProviderRequest {
                model: turn.config.model.clone(),
                messages,
                params: turn.config.params.clone(),
                tools: turn.config.tools.clone(),
            },
        })
    }

    async fn persist(&self, session_id: &str, role: Role, content: &str) -> Result<(), ChatError> {
        self.store.append(session_id, role, content).await.map_err(storage_error)?;
        Ok(())
    }
}

fn storage_error(e: anyhow::Error) -> ChatError {
    ChatError::Storage(format!("{:#}", e))
}

fn error_kind(e: &ChatError) -> &'static str {
    match e {
        ChatError::Validation(_) => "validation",
        ChatError::ForbiddenOrigin(_) => "forbidden-origin",
        ChatError::RateLimited => "rate-limited",
        ChatError::Configuration(_) => "configuration",
        ChatError::Provider(p) => p.kind(),
        ChatError::Dispatch(_) => "dispatch",
        ChatError::Storage(_) => "storage",
        ChatError::Other(_) => "internal",
    }
}

fn report_failure(session_id: Option<&str>, e: &ChatError) {
    match e {
        ChatError::Validation(_) | ChatError::ForbiddenOrigin(_) | ChatError::RateLimited => {
            debug!(error = %e, "Turn refused");
        }
        _ => warn!(error = %e, "Turn failed"),
    }
    ChatEventLogger::log_event(
        session_id.unwrap_or("-"),
        ChatEvent::TurnFailed { error_kind: error_kind(e).to_string(), detail: e.to_string() },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowchat_core::{
        ActionDefinition, ActionField, ExecutionStatus, FieldType, ManualClock, RateLimitConfig,
        GENERIC_FAILURE_MESSAGE,
    };
    use flowchat_memory::InMemorySessionStore;
    use flowchat_providers::MockAdapter;
    use futures::StreamExt;
    use serde_json::json;

    use crate::executor::RecordingExecutor;
    use crate::workflows::StaticWorkflows;

    const BOOKING_REPLY: &str = r#"I'll book that demo for tomorrow at 2pm.

{"type":"action","action_id":"book_demo","confidence":0.9,"extracted_params":{"date":"2026-10-19","time":"14:00"}}"#;

    struct Harness {
        store: Arc<InMemorySessionStore>,
        adapter: Arc<MockAdapter>,
        executor: Arc<RecordingExecutor>,
        workflows: Arc<StaticWorkflows>,
        clock: ManualClock,
        orchestrator: ChatOrchestrator,
    }

    fn book_demo() -> ActionDefinition {
        ActionDefinition {
            id: "book_demo".into(),
            name: "Book a demo".into(),
            description: "Schedule a product demo".into(),
            fields: vec![
                ActionField { name: "date".into(), field_type: FieldType::Date, required: true },
                ActionField { name: "time".into(), field_type: FieldType::Time, required: true },
            ],
        }
    }

    fn harness(config: ChatNodeConfig, adapter: MockAdapter, statuses: Vec<ExecutionStatus>) -> Harness {
        let clock = ManualClock::default();
        let store = Arc::new(InMemorySessionStore::with_clock(Arc::new(clock.clone())));
        let adapter = Arc::new(adapter);
        let executor = Arc::new(RecordingExecutor::new().with_statuses(statuses));
        let workflows = Arc::new(StaticWorkflows::from_nodes([("wf".to_string(), config)]));
        let providers = ProviderSet::new().with(ProviderKind::ChatCompletions, adapter.clone());
        let dispatcher = Arc::new(
            ActionDispatcher::new(executor.clone(), store.clone(), providers.clone(), workflows.clone())
                .with_clock(Arc::new(clock.clone())),
        );
        let orchestrator = ChatOrchestrator::with_clock(
            store.clone(),
            providers,
            workflows.clone(),
            dispatcher,
            Arc::new(clock.clone()),
        );
        Harness { store, adapter, executor, workflows, clock, orchestrator }
    }

    fn ctx() -> TurnContext {
        TurnContext::new("wf")
    }

    #[tokio::test]
    async fn plain_question_gets_message_reply() {
        let h = harness(
            ChatNodeConfig::new("gpt-4o-mini", "You are the Acme shop assistant."),
            MockAdapter::new("openai").with_response("Our return policy lasts 30 days."),
            vec![],
        );

        let reply = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("What's your return policy?")).await.unwrap();
        match &reply {
            TurnReply::Message { display_message, message, .. } => {
                assert_eq!(display_message, "Our return policy lasts 30 days.");
                assert_eq!(message, display_message);
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert!(h.executor.requests().is_empty());

        let history = h.store.history(reply.session_id()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Our return policy lasts 30 days.");

        let sent = &h.adapter.requests()[0];
        assert_eq!(sent.messages.len(), 2);
        assert_eq!(sent.messages[0].role, Role::System);
        assert!(!sent.messages[0].content.contains("## Available Actions"));

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "message");
        assert!(json.get("citations").is_none());
    }

    #[tokio::test]
    async fn booking_request_dispatches_action() {
        let mut config = ChatNodeConfig::new("gpt-4o-mini", "You are the Acme assistant.");
        config.actions = vec![book_demo()];
        let h = harness(config, MockAdapter::new("openai").with_response(BOOKING_REPLY), vec![ExecutionStatus::Running]);

        let reply = h
            .orchestrator
            .handle_turn(&ctx(), TurnRequest::new("Book me a demo for tomorrow at 2pm"))
            .await
            .unwrap();
        let TurnReply::Action { display_message, message, action_id, has_pending_result, execution_id, session_id, .. } =
            &reply
        else {
            panic!("expected action, got {reply:?}");
        };
        assert_eq!(display_message, "I'll book that demo for tomorrow at 2pm.");
        assert_eq!(message, BOOKING_REPLY);
        assert_eq!(action_id, "book_demo");
        assert!(*has_pending_result);

        let requests = h.executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].params["date"], "2026-10-19");
        assert_eq!(requests[0].params["time"], "14:00");
        assert_eq!(&requests[0].session_id, session_id);

        let marker = h.orchestrator.dispatcher.pending().get(execution_id).unwrap();
        assert_eq!(marker.action_id, "book_demo");

        let history = h.store.history(session_id).await.unwrap();
        assert_eq!(history[1].content, "I'll book that demo for tomorrow at 2pm.");

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["has_pending_result"], true);
    }

    #[tokio::test]
    async fn completed_action_yields_follow_up() {
        let mut config = ChatNodeConfig::new("gpt-4o-mini", "You are the Acme assistant.");
        config.actions = vec![book_demo()];
        let adapter = MockAdapter::new("openai")
            .with_response(BOOKING_REPLY)
            .with_response("All set! Your demo is booked for 2pm tomorrow.");
        let h = harness(
            config,
            adapter,
            vec![ExecutionStatus::Completed { output: json!({"confirmation": "DEMO-42"}) }],
        );

        let reply = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("Book me a demo")).await.unwrap();
        let TurnReply::Action { execution_id, session_id, .. } = reply else {
            panic!("expected action");
        };

        assert!(matches!(h.orchestrator.poll(&execution_id).await, PollOutcome::Completed { .. }));
        let follow_ups = h.orchestrator.take_follow_ups(&session_id);
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].message, "All set! Your demo is booked for 2pm tomorrow.");
        assert!(h.orchestrator.take_follow_ups(&session_id).is_empty());
        assert_eq!(h.store.history(&session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn initial_turn_does_not_store_user_message() {
        let h = harness(
            ChatNodeConfig::new("gpt-4o-mini", "Greet visitors."),
            MockAdapter::new("openai").with_response("Hi! How can I help?"),
            vec![],
        );
        let mut request = TurnRequest::new("Hello");
        request.is_initial = true;
        let reply = h.orchestrator.handle_turn(&ctx(), request).await.unwrap();

        let history = h.store.history(reply.session_id()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn session_is_resumed_and_history_forwarded() {
        let h = harness(
            ChatNodeConfig::new("gpt-4o-mini", "sys"),
            MockAdapter::new("openai").with_response("first").with_response("second"),
            vec![],
        );
        let first = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("one")).await.unwrap();
        let second = h
            .orchestrator
            .handle_turn(&ctx(), TurnRequest::new("two").in_session(first.session_id()))
            .await
            .unwrap();
        assert_eq!(first.session_id(), second.session_id());

        let sent = h.adapter.requests();
        let contents: Vec<&str> = sent[1].messages.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "first", "two"]);
    }

    #[tokio::test]
    async fn rate_limit_window() {
        let mut config = ChatNodeConfig::new("gpt-4o-mini", "sys");
        config.rate_limit = Some(RateLimitConfig { enabled: true, max_messages: 3, time_window: 60 });
        let h = harness(config, MockAdapter::new("openai").with_response("ok"), vec![]);

        let first = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("1")).await.unwrap();
        let session_id = first.session_id().to_string();
        for n in 2..=3 {
            let request = TurnRequest::new(n.to_string()).in_session(&session_id);
            h.orchestrator.handle_turn(&ctx(), request).await.unwrap();
        }
        let err = h
            .orchestrator
            .handle_turn(&ctx(), TurnRequest::new("4").in_session(&session_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RateLimited));
        assert_eq!(err.status_code(), 429);

        h.clock.advance(chrono::Duration::seconds(61));
        assert!(h.orchestrator.handle_turn(&ctx(), TurnRequest::new("5").in_session(&session_id)).await.is_ok());
    }

    #[tokio::test]
    async fn refused_turns() {
        let h = harness(ChatNodeConfig::new("gpt-4o-mini", "sys"), MockAdapter::new("openai"), vec![]);

        let err = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("x".repeat(2001))).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("<script>x</script>")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = h
            .orchestrator
            .handle_turn(&TurnContext::new("unknown"), TurnRequest::new("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));

        let guarded = harness(ChatNodeConfig::new("gpt-4o-mini", "sys"), MockAdapter::new("openai"), vec![]);
        let orchestrator = guarded.orchestrator.with_policy(TurnPolicy {
            allowed_origins: vec!["https://shop.example".into()],
            ..TurnPolicy::default()
        });
        let mut context = ctx();
        context.origin = Some("https://evil.example".into());
        let err = orchestrator.handle_turn(&context, TurnRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.status_code(), 403);

        assert!(h.adapter.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_provider_is_a_configuration_error() {
        let h = harness(ChatNodeConfig::new("anthropic/claude-3.5-sonnet", "sys"), MockAdapter::new("openai"), vec![]);
        let err = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }

    #[tokio::test]
    async fn provider_failure_is_generic_for_users() {
        let h = harness(
            ChatNodeConfig::new("gpt-4o-mini", "sys"),
            MockAdapter::new("openai").failing("connection reset by sk-abcdefghijklmnopqrstuvwx"),
            vec![],
        );
        let err = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::Provider(_)));
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn config_edit_reaches_open_sessions() {
        let h = harness(
            ChatNodeConfig::new("gpt-4o-mini", "first prompt"),
            MockAdapter::new("openai").with_response("ok"),
            vec![],
        );
        let reply = h.orchestrator.handle_turn(&ctx(), TurnRequest::new("hi")).await.unwrap();
        h.workflows.upsert("wf", ChatNodeConfig::new("gpt-4o-mini", "second prompt"));
        h.orchestrator
            .handle_turn(&ctx(), TurnRequest::new("again").in_session(reply.session_id()))
            .await
            .unwrap();

        let sent = h.adapter.requests();
        assert!(sent[0].messages[0].content.starts_with("first prompt"));
        assert!(sent[1].messages[0].content.starts_with("second prompt"));
    }

    #[tokio::test]
    async fn streaming_turn_relays_and_persists() {
        let h = harness(
            ChatNodeConfig::new("gpt-4o-mini", "sys"),
            MockAdapter::new("openai").with_stream_chunks(["Hel", "lo"]),
            vec![],
        );
        let mut request = TurnRequest::new("hi");
        request.stream = true;
        let frames: Vec<StreamFrame> = h.orchestrator.handle_stream(&ctx(), request).await.unwrap().collect().await;

        let StreamFrame::SessionId(session_id) = &frames[0] else {
            panic!("first frame must carry the session id");
        };
        assert_eq!(
            &frames[1..],
            &[StreamFrame::Content("Hel".into()), StreamFrame::Content("lo".into()), StreamFrame::Done]
        );
        let history = h.store.history(session_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello");
    }

    #[tokio::test]
    async fn streaming_with_actions_is_rejected() {
        let mut config = ChatNodeConfig::new("gpt-4o-mini", "sys");
        config.actions = vec![book_demo()];
        let h = harness(config, MockAdapter::new("openai").with_stream_chunks(["x"]), vec![]);
        let mut request = TurnRequest::new("hi");
        request.stream = true;
        let frames: Vec<StreamFrame> = h.orchestrator.handle_stream(&ctx(), request).await.unwrap().collect().await;

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1], StreamFrame::Error(STREAMING_WITH_ACTIONS_MESSAGE.into()));
        assert_eq!(frames[2], StreamFrame::Done);
        let StreamFrame::SessionId(session_id) = &frames[0] else {
            panic!("first frame must carry the session id");
        };
        assert!(h.store.history(session_id).await.unwrap().is_empty());
        assert!(h.adapter.requests().is_empty());
    }
}
