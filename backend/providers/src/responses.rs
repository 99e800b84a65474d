//! OpenAI Responses API (`POST /responses`), used when provider-side tools are enabled.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use flowchat_core::{
    CanonicalReply, ChatMessage, Citation, DeltaStream, ProviderAdapter, ProviderError,
    ProviderRequest, Role, SearchKind, SearchResult, StreamDelta, ToolConfig, Usage,
};

use crate::chat_completions::OPENAI_BASE_URL;
use crate::openai_compat::{check_status, DEFAULT_REQUEST_TIMEOUT};
use crate::sse;

const PROVIDER: &str = "openai-responses";

pub struct ResponsesAdapter {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    request_timeout: Duration,
}

impl ResponsesAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: OPENAI_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn send(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ProviderError::KeyMissing {
            provider: PROVIDER.to_string(),
        })?;
        let body = ResponsesRequest::build(request, stream);
        debug!(model = %request.model, tools = body.tools.len(), stream, "Sending Responses API request");

        let mut builder = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(api_key)
            .json(&body);
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;
        check_status(PROVIDER, response).await
    }
}

#[derive(Serialize)]
pub(crate) struct ResponsesRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

impl ResponsesRequest {
    pub(crate) fn build(request: &ProviderRequest, stream: bool) -> Self {
        let (instructions, input) = flatten_conversation(&request.messages);
        Self {
            model: request.model.clone(),
            input,
            instructions,
            tools: tool_definitions(&request.tools),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_output_tokens: request.params.max_tokens,
            stream,
        }
    }
}

/// Split a message list into Responses `instructions` and a single flattened `input`.
///
/// System messages become instructions. Earlier turns are rendered as a
/// "Previous conversation" transcript ahead of the current message.
pub fn flatten_conversation(messages: &[ChatMessage]) -> (Option<String>, String) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let instructions = (!system.is_empty()).then(|| system.join("\n\n"));

    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let Some((current, earlier)) = turns.split_last() else {
        return (instructions, String::new());
    };
    if earlier.is_empty() {
        return (instructions, current.content.clone());
    }

    let transcript: Vec<String> = earlier
        .iter()
        .map(|m| {
            let speaker = if m.role == Role::User { "User" } else { "Assistant" };
            format!("{speaker}: {}", m.content)
        })
        .collect();
    let input = format!(
        "Previous conversation:\n{}\n\nCurrent message: {}",
        transcript.join("\n"),
        current.content
    );
    (instructions, input)
}

fn tool_definitions(tools: &ToolConfig) -> Vec<Value> {
    let mut defs = Vec::new();
    if tools.web_search {
        defs.push(json!({"type": "web_search_preview"}));
    }
    if let Some(fs) = tools.file_search.as_ref().filter(|fs| !fs.vector_store_ids.is_empty()) {
        let mut def = json!({"type": "file_search", "vector_store_ids": fs.vector_store_ids});
        if let Some(max) = fs.max_num_results {
            def["max_num_results"] = json!(max);
        }
        defs.push(def);
    }
    defs
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn opt_string(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decode a buffered Responses API body into a [`CanonicalReply`].
pub fn decode_response(body: &Value) -> Result<CanonicalReply, ProviderError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("unknown");
    if status != "completed" {
        let detail = body
            .pointer("/error/message")
            .or_else(|| body.pointer("/incomplete_details/reason"))
            .and_then(Value::as_str)
            .unwrap_or("no detail");
        return Err(ProviderError::malformed(PROVIDER, format!("response status {status}: {detail}")));
    }

    let output = body
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::malformed(PROVIDER, "response has no output array"))?;

    let mut reply = CanonicalReply::default();
    for item in output {
        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                let parts = item.get("content").and_then(Value::as_array).into_iter().flatten();
                for part in parts {
                    if part.get("type").and_then(Value::as_str) != Some("output_text") {
                        continue;
                    }
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        reply.text.push_str(text);
                    }
                    let annotations = part.get("annotations").and_then(Value::as_array).into_iter().flatten();
                    for a in annotations {
                        match serde_json::from_value::<Citation>(a.clone()) {
                            Ok(Citation::Unknown) | Err(_) => {}
                            Ok(citation) => reply.citations.push(citation),
                        }
                    }
                }
            }
            Some("web_search_call") => reply.search_results.push(SearchResult {
                kind: SearchKind::WebSearch,
                id: opt_string(item, "id"),
                status: opt_string(item, "status"),
                queries: item
                    .pointer("/action/query")
                    .and_then(Value::as_str)
                    .map(|q| vec![q.to_string()])
                    .unwrap_or_default(),
                results: Vec::new(),
            }),
            Some("file_search_call") => reply.search_results.push(SearchResult {
                kind: SearchKind::FileSearch,
                id: opt_string(item, "id"),
                status: opt_string(item, "status"),
                queries: string_list(item.get("queries")),
                results: item
                    .get("results")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            }),
            _ => {}
        }
    }

    if reply.text.is_empty() {
        if let Some(text) = body.get("output_text").and_then(Value::as_str) {
            reply.text = text.to_string();
        }
    }
    if reply.text.is_empty() {
        return Err(ProviderError::malformed(PROVIDER, "completed response carries no output text"));
    }

    reply.usage = body.get("usage").map(|u| Usage {
        prompt_tokens: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
        completion_tokens: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
    });
    Ok(reply)
}

/// Decode one Responses streaming event.
pub fn decode_event(provider: &str, event: &Value) -> Result<Option<StreamDelta>, ProviderError> {
    match event.get("type").and_then(Value::as_str) {
        Some("response.output_text.delta") => Ok(event
            .get("delta")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(|d| StreamDelta::Text(d.to_string()))),
        Some("response.completed") => Ok(Some(StreamDelta::Done)),
        Some(kind @ ("response.failed" | "response.incomplete" | "error")) => {
            let detail = event
                .pointer("/response/error/message")
                .or_else(|| event.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            Err(ProviderError::malformed(provider, format!("{kind}: {detail}")))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl ProviderAdapter for ResponsesAdapter {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<CanonicalReply, ProviderError> {
        let start = Instant::now();
        let response = self.send(request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;
        let reply = decode_response(&body)?;
        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            citations = reply.citations.len(),
            searches = reply.search_results.len(),
            "Responses API reply received"
        );
        Ok(reply)
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, ProviderError> {
        let response = self.send(request, true).await?;
        Ok(sse::delta_stream(response.bytes_stream(), PROVIDER, decode_event))
    }
}
