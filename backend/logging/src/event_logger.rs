//! Chat Event Logger
//!
//! Structured chat events written through `tracing` under the `chat_events`
//! target, so the rolling NDJSON file layer picks them up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    TurnStarted {
        workflow_id: String,
        stream: bool,
        message_chars: usize,
    },
    ProviderCall {
        provider: String,
        model: String,
        latency_ms: u64,
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        streamed: bool,
    },
    ProviderFailed {
        provider: String,
        kind: String,
        detail: String,
    },
    RateLimited {
        client_addr: Option<String>,
    },
    ActionDispatched {
        action_id: String,
        execution_id: String,
        params_json: String,
    },
    FollowUpDelivered {
        execution_id: String,
        action_id: String,
    },
    FollowUpAbandoned {
        execution_id: String,
        reason: String,
    },
    TurnFailed {
        error_kind: String,
        detail: String,
    },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: ChatEvent,
}

pub struct ChatEventLogger;

impl ChatEventLogger {
    /// Redacts free-text fields and emits the event.
    pub fn log_event(session_id: &str, event: ChatEvent) {
        let entry = Self::entry(session_id, event);
        let json = serde_json::to_string(&entry).unwrap_or_default();
        info!(target: "chat_events", session_id = %entry.session_id, event = %json, "Chat event");
    }

    pub(crate) fn entry(session_id: &str, mut event: ChatEvent) -> EventLogEntry {
        match &mut event {
            ChatEvent::ProviderFailed { detail, .. } | ChatEvent::TurnFailed { detail, .. } => {
                *detail = redact_sensitive_data(detail);
            }
            ChatEvent::ActionDispatched { params_json, .. } => {
                *params_json = redact_sensitive_data(params_json);
            }
            ChatEvent::FollowUpAbandoned { reason, .. } => {
                *reason = redact_sensitive_data(reason);
            }
            ChatEvent::TurnStarted { .. }
            | ChatEvent::ProviderCall { .. }
            | ChatEvent::RateLimited { .. }
            | ChatEvent::FollowUpDelivered { .. } => {}
        }

        EventLogEntry {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatched_params_are_redacted() {
        let entry = ChatEventLogger::entry(
            "s1",
            ChatEvent::ActionDispatched {
                action_id: "book_demo".into(),
                execution_id: "e1".into(),
                params_json: r#"{"email":"sam@example.org","date":"2026-10-19"}"#.into(),
            },
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "action_dispatched");
        let params = json["event"]["params_json"].as_str().unwrap();
        assert!(params.contains("[REDACTED_EMAIL]"));
        assert!(params.contains("2026-10-19"));
    }

    #[test]
    fn log_event_does_not_panic_without_subscriber() {
        ChatEventLogger::log_event(
            "s1",
            ChatEvent::TurnFailed { error_kind: "bad-status".into(), detail: "Bearer abc.def".into() },
        );
    }
}
