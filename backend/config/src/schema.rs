//! Flowchat runtime configuration schema.
//!
//! Typed for serde YAML/JSON deserialization. Every section may be omitted;
//! `defaults::apply_all_defaults` fills what the file leaves out.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use flowchat_core::ChatNodeConfig;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root of `flowchat.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowchatConfig {
    /// HTTP listener and widget policy
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// LLM vendor credentials and endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Conversation storage
    #[serde(default)]
    pub session: SessionConfig,

    /// Workflow execution service and follow-up polling
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Chat node per workflow id
    #[serde(default)]
    pub workflows: BTreeMap<String, ChatNodeConfig>,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Origins of the hosting sites allowed to embed the widget
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    /// Used for both Chat Completions and the Responses API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openrouter: Option<OpenRouterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRouterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Sent as `HTTP-Referer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Sent as `X-Title`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Messages retained per session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<usize>,

    /// SQLite database file. Sessions are kept in memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,

    /// Idle days after which `purge-sessions` removes a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_days: Option<u32>,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_polls: Option<u32>,

    /// Lifetime of a pending execution marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_ttl_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for the daily rolling NDJSON log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// JSON console output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sample_yaml() {
        let yaml = r#"
gateway:
  port: 9000
  allowedOrigins: ["https://shop.example"]
providers:
  openrouter:
    apiKey: or-key
    title: Acme Shop
session:
  maxHistory: 30
workflows:
  shop:
    model: gpt-4o-mini
    systemPrompt: You are the Acme shop assistant.
    rateLimit:
      maxMessages: 10
      timeWindow: 60
    actions:
      - id: book_demo
        name: Book a demo
        fields:
          - { name: date, type: date, required: true }
          - { name: notes }
"#;
        let config: FlowchatConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gateway.port, Some(9000));
        assert_eq!(config.providers.openrouter.unwrap().title.as_deref(), Some("Acme Shop"));
        assert_eq!(config.session.max_history, Some(30));

        let shop = &config.workflows["shop"];
        assert_eq!(shop.model, "gpt-4o-mini");
        assert_eq!(shop.rate_limit.as_ref().unwrap().max_messages, 10);
        assert_eq!(shop.actions[0].required_fields().count(), 1);
        assert_eq!(shop.actions[0].optional_fields().count(), 1);
    }
}
