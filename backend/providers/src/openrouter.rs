use async_trait::async_trait;
use reqwest::Client;

use flowchat_core::{CanonicalReply, DeltaStream, ProviderAdapter, ProviderError, ProviderRequest};

use crate::openai_compat::CompatEndpoint;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter.ai, used for any `vendor/model` identifier.
pub struct OpenRouterAdapter {
    endpoint: CompatEndpoint,
}

impl OpenRouterAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        let mut endpoint = CompatEndpoint::new("openrouter", OPENROUTER_BASE_URL, api_key);
        endpoint.forward_top_k = true;
        Self { endpoint }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.endpoint.client = client;
        self
    }

    /// App attribution headers shown on the OpenRouter dashboard.
    pub fn with_attribution(mut self, referer: Option<String>, title: Option<String>) -> Self {
        if let Some(referer) = referer {
            self.endpoint.extra_headers.push(("HTTP-Referer".into(), referer));
        }
        if let Some(title) = title {
            self.endpoint.extra_headers.push(("X-Title".into(), title));
        }
        self
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<CanonicalReply, ProviderError> {
        self.endpoint.complete(request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, ProviderError> {
        self.endpoint.stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{spawn, Recorded};
    use flowchat_core::{ChatMessage, ModelParams, ToolConfig};
    use serde_json::json;

    #[tokio::test]
    async fn forwards_top_k_and_attribution() {
        let recorded = Recorded::default();
        let base = spawn(
            recorded.clone(),
            200,
            json!({"choices": [{"message": {"content": "ok"}}], "usage": {"total_tokens": 3}})
                .to_string(),
            "application/json",
        )
        .await;

        let adapter = OpenRouterAdapter::new(Some("or-key".into()))
            .with_base_url(base)
            .with_attribution(Some("https://shop.example".into()), Some("Shop".into()));
        let request = ProviderRequest {
            model: "anthropic/claude-3.5-sonnet".into(),
            messages: vec![ChatMessage::user("hi")],
            params: ModelParams { top_k: Some(20), ..Default::default() },
            tools: ToolConfig::default(),
        };

        let reply = adapter.complete(&request).await.unwrap();
        assert_eq!(reply.text, "ok");

        let seen = recorded.last().unwrap();
        assert_eq!(seen.body["top_k"], 20);
        assert_eq!(seen.body["model"], "anthropic/claude-3.5-sonnet");
        assert_eq!(seen.referer.as_deref(), Some("https://shop.example"));
        assert_eq!(seen.title.as_deref(), Some("Shop"));
    }

    #[tokio::test]
    async fn malformed_body_is_reported() {
        let base = spawn(Recorded::default(), 200, "{\"unexpected\":true}".into(), "application/json").await;
        let adapter = OpenRouterAdapter::new(Some("k".into())).with_base_url(base);
        let request = ProviderRequest {
            model: "meta-llama/llama-3-8b".into(),
            messages: vec![ChatMessage::user("hi")],
            params: ModelParams::default(),
            tools: ToolConfig::default(),
        };
        let err = adapter.complete(&request).await.unwrap_err();
        assert_eq!(err.kind(), "malformed-response");
    }
}
