pub mod chat_completions;
pub mod mock;
pub mod openai_compat;
pub mod openrouter;
pub mod responses;
pub mod selection;
pub mod sse;

#[cfg(test)]
pub(crate) mod test_server;

pub use chat_completions::{ChatCompletionsAdapter, OPENAI_BASE_URL};
pub use mock::MockAdapter;
pub use openrouter::{OpenRouterAdapter, OPENROUTER_BASE_URL};
pub use responses::ResponsesAdapter;
pub use selection::{is_openai_family, select_provider, ProviderKind, ProviderSet};
