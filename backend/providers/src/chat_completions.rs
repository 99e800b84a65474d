use async_trait::async_trait;
use reqwest::Client;

use flowchat_core::{CanonicalReply, DeltaStream, ProviderAdapter, ProviderError, ProviderRequest};

use crate::openai_compat::CompatEndpoint;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions (`POST /chat/completions`).
pub struct ChatCompletionsAdapter {
    endpoint: CompatEndpoint,
}

impl ChatCompletionsAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            endpoint: CompatEndpoint::new("openai", OPENAI_BASE_URL, api_key),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.endpoint.client = client;
        self
    }
}

#[async_trait]
impl ProviderAdapter for ChatCompletionsAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<CanonicalReply, ProviderError> {
        self.endpoint.complete(request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, ProviderError> {
        self.endpoint.stream(request).await
    }
}
