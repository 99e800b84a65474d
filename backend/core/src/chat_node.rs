//! Per-workflow chat node configuration.

use serde::{Deserialize, Serialize};

/// Everything a workflow's chat node decides about a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatNodeConfig {
    /// Model identifier, e.g. `gpt-4o-mini` or `anthropic/claude-3.5-sonnet`.
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub params: ModelParams,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Bumped by the host whenever the node is edited; sessions reload their snapshot on change.
    #[serde(default)]
    pub revision: u64,
}

impl ChatNodeConfig {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            params: ModelParams::default(),
            actions: Vec::new(),
            tools: ToolConfig::default(),
            rate_limit: None,
            revision: 0,
        }
    }

    pub fn find_action(&self, action_id: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.id == action_id)
    }
}

/// Sampling parameters forwarded to providers. Unset values are omitted from requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Provider-side tools (Responses API only).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub file_search: Option<FileSearchConfig>,
}

impl ToolConfig {
    pub fn any_enabled(&self) -> bool {
        self.web_search || self.file_search.as_ref().is_some_and(|f| !f.vector_store_ids.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSearchConfig {
    #[serde(default)]
    pub vector_store_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_results: Option<u32>,
}

/// Per-session sliding-window limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub max_messages: u32,
    /// Trailing window in seconds.
    pub time_window: u64,
}

fn default_true() -> bool {
    true
}

/// A structured operation the model may request mid-conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<ActionField>,
}

impl ActionDefinition {
    pub fn required_fields(&self) -> impl Iterator<Item = &ActionField> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn optional_fields(&self) -> impl Iterator<Item = &ActionField> {
        self.fields.iter().filter(|f| !f.required)
    }

    pub fn declares(&self, field_name: &str) -> bool {
        self.fields.iter().any(|f| f.name == field_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionField {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Email,
    Phone,
    Number,
    Date,
    Time,
    Boolean,
    Url,
    #[serde(other)]
    Other,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Boolean => "boolean",
            FieldType::Url => "url",
            FieldType::Other => "value",
        }
    }
}
