//! Config defaults: applies default values to a parsed config.

use std::collections::HashMap;

use crate::schema::{FlowchatConfig, OpenRouterConfig, ProviderEndpoint};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_HISTORY: usize = 20;
pub const DEFAULT_INACTIVE_DAYS: u32 = 30;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MAX_POLLS: u32 = 30;
pub const DEFAULT_PENDING_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
pub const OPENROUTER_KEY_VAR: &str = "OPENROUTER_API_KEY";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: FlowchatConfig, env: &HashMap<String, String>) -> FlowchatConfig {
    let config = apply_gateway_defaults(config);
    let config = apply_provider_defaults(config, env);
    let config = apply_session_defaults(config);
    let config = apply_dispatch_defaults(config);
    apply_logging_defaults(config)
}

fn apply_gateway_defaults(mut config: FlowchatConfig) -> FlowchatConfig {
    let gw = &mut config.gateway;
    gw.bind.get_or_insert_with(|| DEFAULT_BIND.to_string());
    gw.port.get_or_insert(DEFAULT_PORT);
    gw.stream_timeout_secs.get_or_insert(DEFAULT_STREAM_TIMEOUT_SECS);
    config
}

/// API keys missing from the file fall back to the conventional env vars.
fn apply_provider_defaults(mut config: FlowchatConfig, env: &HashMap<String, String>) -> FlowchatConfig {
    let from_env = |name: &str| env.get(name).filter(|v| !v.trim().is_empty()).cloned();

    if let Some(key) = from_env(OPENAI_KEY_VAR) {
        let openai = config.providers.openai.get_or_insert_with(ProviderEndpoint::default);
        if openai.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
            openai.api_key = Some(key);
        }
    }
    if let Some(key) = from_env(OPENROUTER_KEY_VAR) {
        let openrouter = config.providers.openrouter.get_or_insert_with(OpenRouterConfig::default);
        if openrouter.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
            openrouter.api_key = Some(key);
        }
    }
    config
}

fn apply_session_defaults(mut config: FlowchatConfig) -> FlowchatConfig {
    config.session.max_history.get_or_insert(DEFAULT_MAX_HISTORY);
    config.session.inactive_days.get_or_insert(DEFAULT_INACTIVE_DAYS);
    config
}

fn apply_dispatch_defaults(mut config: FlowchatConfig) -> FlowchatConfig {
    let dispatch = &mut config.dispatch;
    dispatch.poll_interval_secs.get_or_insert(DEFAULT_POLL_INTERVAL_SECS);
    dispatch.max_polls.get_or_insert(DEFAULT_MAX_POLLS);
    dispatch.pending_ttl_secs.get_or_insert(DEFAULT_PENDING_TTL_SECS);
    config
}

fn apply_logging_defaults(mut config: FlowchatConfig) -> FlowchatConfig {
    config.logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    config.logging.json.get_or_insert(false);
    config
}
