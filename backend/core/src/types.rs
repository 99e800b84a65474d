use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A conversation bound to one workflow's chat node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Mint a session with a fresh random identifier.
    pub fn new(workflow_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_session_id(),
            workflow_id: workflow_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Session ids are v4 UUIDs drawn from the OS RNG, rendered without hyphens.
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for ChatMessage {
    fn from(m: &StoredMessage) -> Self {
        ChatMessage { role: m.role, content: m.content.clone() }
    }
}

/// Information about the page hosting the chat widget.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageContext {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "type")]
    pub page_type: Option<String>,
    #[serde(default, alias = "content")]
    pub content_summary: Option<String>,
    #[serde(default)]
    pub product: Option<ProductContext>,
}

impl PageContext {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.url.is_none()
            && self.page_type.is_none()
            && self.content_summary.is_none()
            && self.product.is_none()
    }
}

/// Commerce metadata for product pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductContext {
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, alias = "stock")]
    pub stock_status: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}
