//! Wire format shared by every Chat Completions compatible endpoint.
//!
//! OpenAI and OpenRouter speak the same request/response dialect; the two
//! adapters differ only in base URL, extra headers, and whether `top_k` is
//! forwarded.

use std::time::{Duration, Instant};

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use flowchat_core::{
    CanonicalReply, DeltaStream, ProviderError, ProviderRequest, StreamDelta, Usage,
};

use crate::sse;

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> ChatRequest<'a> {
    pub(crate) fn build(request: &'a ProviderRequest, forward_top_k: bool, stream: bool) -> Self {
        let p = &request.params;
        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage { role: m.role.as_str(), content: &m.content })
                .collect(),
            temperature: p.temperature,
            top_p: p.top_p,
            top_k: if forward_top_k { p.top_k } else { None },
            frequency_penalty: p.frequency_penalty,
            presence_penalty: p.presence_penalty,
            max_tokens: p.max_tokens,
            stream,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Decode a buffered Chat Completions body. The first choice's text is the reply.
pub fn decode_completion(provider: &str, body: &Value) -> Result<CanonicalReply, ProviderError> {
    let parsed: ChatResponse = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::malformed(provider, e.to_string()))?;

    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::malformed(provider, "response has no choices[0].message.content"))?;

    Ok(CanonicalReply {
        text,
        usage: parsed.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
        ..Default::default()
    })
}

/// Decode one streaming chunk: `choices[0].delta.content`.
pub fn decode_chunk(provider: &str, chunk: &Value) -> Result<Option<StreamDelta>, ProviderError> {
    if let Some(err) = chunk.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(ProviderError::malformed(provider, format!("stream error: {message}")));
    }

    let choice = chunk.get("choices").and_then(|c| c.get(0));
    let content = choice
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    Ok(content.map(|s| StreamDelta::Text(s.to_string())))
}

/// HTTP plumbing for one Chat Completions endpoint.
#[derive(Clone)]
pub(crate) struct CompatEndpoint {
    pub client: Client,
    pub provider: &'static str,
    pub base_url: String,
    pub api_key: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub forward_top_k: bool,
    pub request_timeout: Duration,
}

impl CompatEndpoint {
    pub(crate) fn new(provider: &'static str, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            extra_headers: Vec::new(),
            forward_top_k: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    async fn send(&self, request: &ProviderRequest, stream: bool) -> Result<Response, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| ProviderError::KeyMissing {
            provider: self.provider.to_string(),
        })?;

        let body = ChatRequest::build(request, self.forward_top_k, stream);
        debug!(provider = self.provider, model = %request.model, stream, "Sending chat completion request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body);
        for (name, value) in &self.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !stream {
            builder = builder.timeout(self.request_timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::transport(self.provider, e))?;
        check_status(self.provider, response).await
    }

    pub(crate) async fn complete(&self, request: &ProviderRequest) -> Result<CanonicalReply, ProviderError> {
        let start = Instant::now();
        let response = self.send(request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(self.provider, e.to_string()))?;
        let reply = decode_completion(self.provider, &body)?;
        debug!(
            provider = self.provider,
            latency_ms = start.elapsed().as_millis() as u64,
            "Chat completion received"
        );
        Ok(reply)
    }

    pub(crate) async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, ProviderError> {
        let response = self.send(request, true).await?;
        Ok(sse::delta_stream(response.bytes_stream(), self.provider, decode_chunk))
    }
}

/// Turn a non-2xx response into [`ProviderError::BadStatus`], keeping a bounded slice of the body.
pub(crate) async fn check_status(provider: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::BadStatus {
        provider: provider.to_string(),
        status: status.as_u16(),
        body: body.chars().take(500).collect(),
    })
}
