//! Splits a provider reply into user-visible text and an optional action directive.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use flowchat_core::{ActionDefinition, CanonicalReply, Citation};

use crate::json_scan;

/// Shown when stripping the directive leaves nothing to display.
pub const ACTION_ACKNOWLEDGEMENT: &str = "Thanks! I'm taking care of that for you now.";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?.*?```").unwrap());
static BLANK_LINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Any reply shape the interpreter accepts.
#[derive(Debug, Clone)]
pub enum RawReply {
    Canonical(CanonicalReply),
    /// An undecoded Chat Completions response body.
    ChatCompletion(Value),
    Text(String),
}

impl From<CanonicalReply> for RawReply {
    fn from(reply: CanonicalReply) -> Self {
        RawReply::Canonical(reply)
    }
}

impl From<String> for RawReply {
    fn from(text: String) -> Self {
        RawReply::Text(text)
    }
}

impl From<&str> for RawReply {
    fn from(text: &str) -> Self {
        RawReply::Text(text.to_string())
    }
}

impl RawReply {
    fn into_parts(self) -> (String, Vec<Citation>) {
        match self {
            RawReply::Canonical(reply) => (reply.text, reply.citations),
            RawReply::ChatCompletion(body) => {
                let text = body
                    .pointer("/choices/0/message/content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (text, Vec::new())
            }
            RawReply::Text(text) => (text, Vec::new()),
        }
    }
}

/// The directive a model embeds in its reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Directive {
    Action {
        action_id: String,
        #[serde(default)]
        confidence: Option<Value>,
        #[serde(default)]
        extracted_params: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interpretation {
    Message {
        text: String,
        citations: Vec<Citation>,
    },
    Action {
        display_text: String,
        action_id: String,
        params: Map<String, Value>,
        confidence: f64,
        citations: Vec<Citation>,
        /// The reply exactly as the model produced it.
        raw_text: String,
    },
}

impl Interpretation {
    pub fn is_action(&self) -> bool {
        matches!(self, Interpretation::Action { .. })
    }
}

/// Interpret a reply against the configured actions. Never fails: anything
/// that is not a usable directive degrades to a plain message.
pub fn interpret(raw: impl Into<RawReply>, actions: &[ActionDefinition]) -> Interpretation {
    let (text, citations) = raw.into().into_parts();

    let Some(span) = json_scan::first_object(&text) else {
        return Interpretation::Message { text, citations };
    };

    let directive = match serde_json::from_value::<Directive>(Value::Object(span.object)) {
        Ok(d) => d,
        Err(_) => return Interpretation::Message { text, citations },
    };
    let Directive::Action { action_id, confidence, extracted_params } = directive;

    let Some(definition) = actions.iter().find(|a| a.id == action_id) else {
        debug!(action_id = %action_id, "Directive names an unknown action, treating as text");
        return Interpretation::Message { text, citations };
    };
    if extracted_params.is_empty() {
        debug!(action_id = %action_id, "Directive carries no parameters, treating as text");
        return Interpretation::Message { text, citations };
    }

    for name in extracted_params.keys().filter(|k| !definition.declares(k)) {
        debug!(action_id = %action_id, field = %name, "Directive extracted an undeclared field");
    }
    for field in definition.required_fields().filter(|f| !extracted_params.contains_key(&f.name)) {
        debug!(action_id = %action_id, field = %field.name, "Directive is missing a required field");
    }

    let mut display = String::with_capacity(text.len());
    display.push_str(&text[..span.start]);
    display.push_str(&text[span.end..]);
    let display = FENCE_RE.replace_all(&display, "");
    let display = BLANK_LINES_RE.replace_all(display.trim(), "\n\n").into_owned();
    let display_text = if display.is_empty() {
        ACTION_ACKNOWLEDGEMENT.to_string()
    } else {
        display
    };

    let confidence = confidence
        .and_then(|c| c.as_f64().or_else(|| c.as_str().and_then(|s| s.trim().parse().ok())))
        .unwrap_or(1.0);

    Interpretation::Action {
        display_text,
        action_id,
        params: extracted_params,
        confidence,
        citations,
        raw_text: text,
    }
}
