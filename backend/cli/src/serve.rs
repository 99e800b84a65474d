//! `flowchat serve`: wire the store, providers and executor into a running gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use flowchat_agent::{
    ActionDispatcher, ChatOrchestrator, HttpWorkflowExecutor, StaticWorkflows, TurnPolicy, UnconfiguredExecutor,
};
use flowchat_config::defaults::{
    DEFAULT_BIND, DEFAULT_MAX_HISTORY, DEFAULT_MAX_POLLS, DEFAULT_PENDING_TTL_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_PORT, DEFAULT_STREAM_TIMEOUT_SECS,
};
use flowchat_config::{DispatchConfig, FlowchatConfig, ProvidersConfig, SessionConfig};
use flowchat_core::WorkflowExecutor;
use flowchat_gateway::server::{start_server, GatewayState};
use flowchat_memory::{InMemorySessionStore, PendingExecutions, SessionStore, SqliteSessionStore};
use flowchat_providers::{ChatCompletionsAdapter, OpenRouterAdapter, ProviderKind, ProviderSet, ResponsesAdapter};

pub async fn run(config: FlowchatConfig) -> Result<()> {
    let addr = listen_addr(&config)?;
    let allowed_origins = config.gateway.allowed_origins.clone();
    let orchestrator = build_orchestrator(&config)?;

    info!(
        addr = %addr,
        workflows = config.workflows.len(),
        "Starting Flowchat gateway"
    );
    start_server(addr, GatewayState::new(Arc::new(orchestrator)), allowed_origins).await
}

pub fn listen_addr(config: &FlowchatConfig) -> Result<SocketAddr> {
    let bind = config.gateway.bind.as_deref().unwrap_or(DEFAULT_BIND);
    let port = config.gateway.port.unwrap_or(DEFAULT_PORT);
    format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {bind}:{port}"))
}

/// Build the orchestrator and its collaborators from a defaulted config.
pub fn build_orchestrator(config: &FlowchatConfig) -> Result<ChatOrchestrator> {
    let store = open_store(&config.session)?;
    let providers = build_providers(&config.providers);
    let workflows = Arc::new(StaticWorkflows::from_nodes(config.workflows.clone()));
    let executor = build_executor(&config.dispatch);

    let ttl = Duration::from_secs(config.dispatch.pending_ttl_secs.unwrap_or(DEFAULT_PENDING_TTL_SECS));
    let dispatcher = ActionDispatcher::new(executor, store.clone(), providers.clone(), workflows.clone())
        .with_max_polls(config.dispatch.max_polls.unwrap_or(DEFAULT_MAX_POLLS))
        .with_pending(PendingExecutions::new(ttl));

    let policy = TurnPolicy {
        allowed_origins: config.gateway.allowed_origins.clone(),
        stream_timeout: Duration::from_secs(
            config.gateway.stream_timeout_secs.unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS),
        ),
    };
    let poll_interval = Duration::from_secs(config.dispatch.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS));

    Ok(ChatOrchestrator::new(store, providers, workflows, Arc::new(dispatcher))
        .with_policy(policy)
        .with_follow_up_polling(poll_interval))
}

/// SQLite when a path is configured, otherwise process memory.
pub fn open_store(session: &SessionConfig) -> Result<Arc<dyn SessionStore>> {
    let max_history = session.max_history.unwrap_or(DEFAULT_MAX_HISTORY);
    match session.sqlite_path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let store = SqliteSessionStore::open(path)
                .with_context(|| format!("Failed to open session database {path}"))?
                .with_max_history(max_history);
            info!(path = %path, max_history, "Using SQLite session store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No session.sqlitePath configured; sessions are kept in memory and lost on restart");
            Ok(Arc::new(InMemorySessionStore::new().with_max_history(max_history)))
        }
    }
}

/// Register an adapter for every configured vendor.
pub fn build_providers(config: &ProvidersConfig) -> ProviderSet {
    let mut providers = ProviderSet::new();

    if let Some(openai) = &config.openai {
        let mut completions = ChatCompletionsAdapter::new(openai.api_key.clone());
        let mut responses = ResponsesAdapter::new(openai.api_key.clone());
        if let Some(base_url) = &openai.base_url {
            completions = completions.with_base_url(base_url.clone());
            responses = responses.with_base_url(base_url.clone());
        }
        providers.register(ProviderKind::ChatCompletions, Arc::new(completions));
        providers.register(ProviderKind::Responses, Arc::new(responses));
        info!("Registered OpenAI providers");
    }

    if let Some(openrouter) = &config.openrouter {
        let mut adapter = OpenRouterAdapter::new(openrouter.api_key.clone())
            .with_attribution(openrouter.referer.clone(), openrouter.title.clone());
        if let Some(base_url) = &openrouter.base_url {
            adapter = adapter.with_base_url(base_url.clone());
        }
        providers.register(ProviderKind::OpenRouter, Arc::new(adapter));
        info!("Registered OpenRouter provider");
    }

    providers
}

fn build_executor(dispatch: &DispatchConfig) -> Arc<dyn WorkflowExecutor> {
    match dispatch.executor_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            info!(url = %url, "Using HTTP workflow executor");
            Arc::new(HttpWorkflowExecutor::new(url).with_api_key(dispatch.executor_api_key.clone()))
        }
        None => Arc::new(UnconfiguredExecutor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowchat_agent::{TurnContext, TurnRequest};
    use flowchat_config::{apply_all_defaults, parse_config, OpenRouterConfig, ProviderEndpoint};
    use flowchat_core::ChatError;
    use std::collections::HashMap;

    #[test]
    fn registers_only_configured_vendors() {
        let mut config = ProvidersConfig::default();
        assert!(build_providers(&config).kinds().is_empty());

        config.openai = Some(ProviderEndpoint { api_key: Some("sk-test".into()), base_url: None });
        let mut kinds = build_providers(&config).kinds();
        kinds.sort_by_key(|k| k.label());
        assert_eq!(kinds, vec![ProviderKind::ChatCompletions, ProviderKind::Responses]);

        config.openrouter = Some(OpenRouterConfig { api_key: Some("or-test".into()), ..Default::default() });
        assert_eq!(build_providers(&config).kinds().len(), 3);
    }

    #[test]
    fn listen_address_uses_defaults() {
        let config = FlowchatConfig::default();
        assert_eq!(listen_addr(&config).unwrap().port(), DEFAULT_PORT);
    }

    #[tokio::test]
    async fn in_memory_store_honours_history_limit() {
        let store = open_store(&SessionConfig { max_history: Some(4), ..Default::default() }).unwrap();
        assert_eq!(store.max_history(), 4);
    }

    #[tokio::test]
    async fn wired_orchestrator_refuses_unknown_workflows() {
        let yaml = "workflows:\n  shop:\n    model: gpt-4o-mini\n    systemPrompt: Be brief.\n";
        let config = apply_all_defaults(parse_config(yaml, &HashMap::new()).unwrap(), &HashMap::new());
        let orchestrator = build_orchestrator(&config).unwrap();

        let err = orchestrator
            .handle_turn(&TurnContext::new("other"), TurnRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));

        // No OpenAI section, so the shop node has no adapter.
        let err = orchestrator
            .handle_turn(&TurnContext::new("shop"), TurnRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }
}
