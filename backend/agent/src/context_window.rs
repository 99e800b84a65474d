//! Outbound message list assembly.

use tracing::debug;

use flowchat_core::{ChatMessage, ChatNodeConfig, PageContext, Role, StoredMessage};

use crate::system_prompt::PromptBuilder;

pub struct ContextBuilder;

impl ContextBuilder {
    /// System message first, then at most `max_history` prior turns, then the current message.
    ///
    /// Stored system-role entries are skipped so the result carries exactly one system message.
    pub fn build(
        config: &ChatNodeConfig,
        history: &[StoredMessage],
        page: Option<&PageContext>,
        current: &str,
        max_history: usize,
    ) -> Vec<ChatMessage> {
        let turns: Vec<&StoredMessage> = history.iter().filter(|m| m.role != Role::System).collect();
        let skip = turns.len().saturating_sub(max_history);
        if skip > 0 {
            debug!(dropped = skip, "Trimming history to the retained maximum");
        }

        let mut messages = Vec::with_capacity(turns.len() - skip + 2);
        messages.push(ChatMessage::system(PromptBuilder::build(config, page)));
        messages.extend(turns.into_iter().skip(skip).map(ChatMessage::from));
        messages.push(ChatMessage::user(current));
        messages
    }
}
