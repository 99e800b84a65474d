//! Config validation: schema checks with user-friendly error messages.

use std::collections::HashSet;

use crate::schema::FlowchatConfig;
use flowchat_core::ChatNodeConfig;
use flowchat_providers::{select_provider, ProviderKind};
use thiserror::Error;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &FlowchatConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_gateway(config, &mut report);
    validate_session(config, &mut report);
    validate_dispatch(config, &mut report);
    if config.workflows.is_empty() {
        report.warn("workflows", "No workflows configured; every chat turn will be refused");
    }
    for (id, node) in &config.workflows {
        validate_workflow(config, id, node, &mut report);
    }
    report
}

fn validate_gateway(config: &FlowchatConfig, report: &mut ValidationReport) {
    let gw = &config.gateway;
    if let Some(port) = gw.port {
        if port == 0 {
            report.error("gateway.port", "port must be > 0");
        } else if port < 1024 && port != 80 && port != 443 {
            report.warn(
                "gateway.port",
                format!("Port {port} requires elevated privileges; consider using a port >= 1024"),
            );
        }
    }
    if gw.stream_timeout_secs == Some(0) {
        report.error("gateway.streamTimeoutSecs", "streamTimeoutSecs must be > 0");
    }
    for (i, origin) in gw.allowed_origins.iter().enumerate() {
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            report.error(
                format!("gateway.allowedOrigins[{i}]"),
                format!("'{origin}' is not an http(s) origin"),
            );
        }
    }
}

fn validate_session(config: &FlowchatConfig, report: &mut ValidationReport) {
    if config.session.max_history == Some(0) {
        report.error("session.maxHistory", "maxHistory must be >= 1");
    }
    if config.session.inactive_days == Some(0) {
        report.error("session.inactiveDays", "inactiveDays must be >= 1");
    }
}

fn validate_dispatch(config: &FlowchatConfig, report: &mut ValidationReport) {
    let dispatch = &config.dispatch;
    if dispatch.poll_interval_secs == Some(0) {
        report.error("dispatch.pollIntervalSecs", "pollIntervalSecs must be >= 1");
    }
    if dispatch.max_polls == Some(0) {
        report.error("dispatch.maxPolls", "maxPolls must be >= 1");
    }
    let has_actions = config.workflows.values().any(|w| !w.actions.is_empty());
    if has_actions && dispatch.executor_url.as_deref().map(str::trim).unwrap_or("").is_empty() {
        report.error("dispatch.executorUrl", "Workflows define actions but no executor URL is configured");
    }
}

fn validate_workflow(config: &FlowchatConfig, id: &str, node: &ChatNodeConfig, report: &mut ValidationReport) {
    let path = format!("workflows.{id}");
    if id.trim().is_empty() {
        report.error("workflows", "Workflow id cannot be empty");
    }
    if node.model.trim().is_empty() {
        report.error(format!("{path}.model"), "Model id cannot be empty");
    } else if !provider_key_present(config, select_provider(&node.model, &node.tools)) {
        let kind = select_provider(&node.model, &node.tools);
        report.error(
            format!("{path}.model"),
            format!("Model '{}' needs the {} provider, which has no API key", node.model, kind),
        );
    }
    if node.system_prompt.trim().is_empty() {
        report.warn(format!("{path}.systemPrompt"), "System prompt is empty");
    }

    if let Some(rl) = &node.rate_limit {
        if rl.enabled && rl.time_window == 0 {
            report.error(format!("{path}.rateLimit.timeWindow"), "timeWindow must be > 0");
        }
        if rl.enabled && rl.max_messages == 0 {
            report.error(format!("{path}.rateLimit.maxMessages"), "maxMessages must be > 0");
        }
    }

    if let Some(fs) = &node.tools.file_search {
        if fs.vector_store_ids.is_empty() {
            report.warn(
                format!("{path}.tools.fileSearch"),
                "File search has no vector store ids and will be ignored",
            );
        }
    }

    if !node.actions.is_empty() {
        report.warn(
            format!("{path}.actions"),
            "Chat nodes with actions cannot stream; streaming turns will be rejected",
        );
    }

    let mut seen = HashSet::new();
    for (i, action) in node.actions.iter().enumerate() {
        let action_path = format!("{path}.actions[{i}]");
        if action.id.trim().is_empty() {
            report.error(format!("{action_path}.id"), "Action id cannot be empty");
        } else if !seen.insert(action.id.as_str()) {
            report.error(format!("{action_path}.id"), format!("Duplicate action id '{}'", action.id));
        }
        if action.fields.is_empty() {
            report.warn(
                format!("{action_path}.fields"),
                "Action declares no fields; the model cannot extract parameters for it",
            );
        }
        for (j, field) in action.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                report.error(format!("{action_path}.fields[{j}].name"), "Field name cannot be empty");
            }
        }
    }
}

fn provider_key_present(config: &FlowchatConfig, kind: ProviderKind) -> bool {
    let key = match kind {
        ProviderKind::ChatCompletions | ProviderKind::Responses => {
            config.providers.openai.as_ref().and_then(|p| p.api_key.as_deref())
        }
        ProviderKind::OpenRouter => config.providers.openrouter.as_ref().and_then(|p| p.api_key.as_deref()),
    };
    key.is_some_and(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProviderEndpoint;
    use flowchat_core::{ActionDefinition, ActionField, FieldType, RateLimitConfig};

    fn configured(node: ChatNodeConfig) -> FlowchatConfig {
        let mut cfg = FlowchatConfig::default();
        cfg.providers.openai = Some(ProviderEndpoint { api_key: Some("sk-test".into()), base_url: None });
        cfg.workflows.insert("shop".into(), node);
        cfg
    }

    fn action(id: &str, field: &str) -> ActionDefinition {
        ActionDefinition {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            fields: vec![ActionField { name: field.into(), field_type: FieldType::Text, required: true }],
        }
    }

    #[test]
    fn minimal_workflow_is_valid() {
        let report = validate(&configured(ChatNodeConfig::new("gpt-4o-mini", "Be helpful.")));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    }

    #[test]
    fn missing_provider_key_is_error() {
        let mut cfg = configured(ChatNodeConfig::new("anthropic/claude-3.5-sonnet", "Be helpful."));
        cfg.providers.openai = None;
        let report = validate(&cfg);
        assert!(!report.is_valid());
        assert!(report.errors[0].message.contains("openrouter"));
    }

    #[test]
    fn flags_bad_node_settings() {
        let mut node = ChatNodeConfig::new("", "Be helpful.");
        node.rate_limit = Some(RateLimitConfig { enabled: true, max_messages: 5, time_window: 0 });
        node.actions = vec![action("book_demo", "date"), action("book_demo", ""), action(" ", "x")];
        let mut cfg = configured(node);
        cfg.session.max_history = Some(0);
        cfg.dispatch.executor_url = Some("http://localhost:9100".into());

        let report = validate(&cfg);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"session.maxHistory"));
        assert!(paths.contains(&"workflows.shop.model"));
        assert!(paths.contains(&"workflows.shop.rateLimit.timeWindow"));
        assert!(paths.contains(&"workflows.shop.actions[1].id"));
        assert!(paths.contains(&"workflows.shop.actions[1].fields[0].name"));
        assert!(paths.contains(&"workflows.shop.actions[2].id"));
        assert!(report.warnings.iter().any(|w| w.message.contains("cannot stream")));
    }

    #[test]
    fn actions_require_an_executor() {
        let mut node = ChatNodeConfig::new("gpt-4o-mini", "Be helpful.");
        node.actions = vec![action("book_demo", "date")];
        let report = validate(&configured(node));
        assert!(report.errors.iter().any(|e| e.path == "dispatch.executorUrl"));
    }
}
