use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use flowchat_core::{ProviderAdapter, ProviderError, ToolConfig};

/// Which wire dialect serves a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    ChatCompletions,
    Responses,
    OpenRouter,
}

impl ProviderKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::ChatCompletions => "openai",
            ProviderKind::Responses => "openai-responses",
            ProviderKind::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const OPENAI_MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4", "chatgpt-"];

pub fn is_openai_family(model: &str) -> bool {
    let model = model.trim().to_ascii_lowercase();
    OPENAI_MODEL_PREFIXES.iter().any(|p| model.starts_with(p))
}

/// Pick the adapter for a model.
///
/// `vendor/model` identifiers always go to OpenRouter. OpenAI models with
/// web or file search enabled use the Responses API; everything else uses
/// Chat Completions.
pub fn select_provider(model: &str, tools: &ToolConfig) -> ProviderKind {
    if model.contains('/') {
        ProviderKind::OpenRouter
    } else if tools.any_enabled() && is_openai_family(model) {
        ProviderKind::Responses
    } else {
        ProviderKind::ChatCompletions
    }
}

/// The configured adapters, looked up by [`ProviderKind`].
#[derive(Default, Clone)]
pub struct ProviderSet {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ProviderKind, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn with(mut self, kind: ProviderKind, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(kind, adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Resolve the adapter for a model, failing with `KeyMissing` when that
    /// provider was never configured.
    pub fn resolve(
        &self,
        model: &str,
        tools: &ToolConfig,
    ) -> Result<(ProviderKind, Arc<dyn ProviderAdapter>), ProviderError> {
        let kind = select_provider(model, tools);
        self.get(kind)
            .map(|adapter| (kind, adapter))
            .ok_or_else(|| ProviderError::KeyMissing { provider: kind.label().to_string() })
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use flowchat_core::FileSearchConfig;

    fn web() -> ToolConfig {
        ToolConfig { web_search: true, file_search: None }
    }

    #[test]
    fn slash_models_route_to_openrouter() {
        assert_eq!(select_provider("anthropic/claude-3.5-sonnet", &web()), ProviderKind::OpenRouter);
        assert_eq!(select_provider("openai/gpt-4o", &ToolConfig::default()), ProviderKind::OpenRouter);
    }

    #[test]
    fn openai_with_tools_uses_responses() {
        assert_eq!(select_provider("gpt-4o", &web()), ProviderKind::Responses);
        assert_eq!(select_provider("o3-mini", &web()), ProviderKind::Responses);
        let files = ToolConfig {
            web_search: false,
            file_search: Some(FileSearchConfig { vector_store_ids: vec!["vs".into()], max_num_results: None }),
        };
        assert_eq!(select_provider("gpt-4.1", &files), ProviderKind::Responses);
    }

    #[test]
    fn everything_else_uses_chat_completions() {
        assert_eq!(select_provider("gpt-4o-mini", &ToolConfig::default()), ProviderKind::ChatCompletions);
        assert_eq!(select_provider("llama3", &web()), ProviderKind::ChatCompletions);
        // file search without stores is not a tool
        let empty = ToolConfig { web_search: false, file_search: Some(FileSearchConfig::default()) };
        assert_eq!(select_provider("gpt-4o", &empty), ProviderKind::ChatCompletions);
    }

    #[test]
    fn resolve_reports_missing_provider() {
        let set = ProviderSet::new().with(ProviderKind::ChatCompletions, Arc::new(MockAdapter::new("openai")));
        let (kind, adapter) = set.resolve("gpt-4o-mini", &ToolConfig::default()).unwrap();
        assert_eq!(kind, ProviderKind::ChatCompletions);
        assert_eq!(adapter.name(), "openai");

        let err = set.resolve("mistralai/mistral-7b", &ToolConfig::default()).err().unwrap();
        assert!(matches!(err, ProviderError::KeyMissing { ref provider } if provider == "openrouter"));
    }
}
