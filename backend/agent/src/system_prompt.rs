//! System prompt composition.
//!
//! The configured prompt is extended with an optional page-context block and
//! an optional action-capability block. Both are appended, never interleaved,
//! so enabling a feature only ever grows the prompt.

use std::fmt::Write;

use flowchat_core::{ActionDefinition, ChatNodeConfig, PageContext};

pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the system message text for one turn.
    pub fn build(config: &ChatNodeConfig, page: Option<&PageContext>) -> String {
        let mut prompt = config.system_prompt.clone();

        if let Some(page) = page.filter(|p| !p.is_empty()) {
            prompt.push_str(&Self::page_block(page));
        }
        if !config.actions.is_empty() {
            prompt.push_str(&Self::capability_block(&config.actions));
        }

        prompt
    }

    fn page_block(page: &PageContext) -> String {
        let mut block = String::from("\n\n## Current Page Context\nThe user is currently viewing this page:\n");
        let fields = [
            ("Title", page.title.as_deref()),
            ("URL", page.url.as_deref()),
            ("Page type", page.page_type.as_deref()),
            ("Content summary", page.content_summary.as_deref()),
        ];
        for (label, value) in fields {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                let _ = writeln!(block, "- {label}: {}", html_escape(value));
            }
        }

        if let Some(product) = &page.product {
            block.push_str("\nProduct details:\n");
            let fields = [
                ("Price", product.price.as_deref()),
                ("SKU", product.sku.as_deref()),
                ("Stock status", product.stock_status.as_deref()),
            ];
            for (label, value) in fields {
                if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                    let _ = writeln!(block, "- {label}: {}", html_escape(value));
                }
            }
            if !product.categories.is_empty() {
                let categories: Vec<String> = product.categories.iter().map(|c| html_escape(c)).collect();
                let _ = writeln!(block, "- Categories: {}", categories.join(", "));
            }
        }

        block.push_str(
            "\nUse this context to give relevant, specific answers. \
             Do not mention or reveal that you were given this page information.",
        );
        block
    }

    fn capability_block(actions: &[ActionDefinition]) -> String {
        let mut block = String::from(
            "\n\n## Available Actions\n\
             You can trigger the following actions when the user's request matches one of them:\n",
        );

        for action in actions {
            let _ = write!(block, "\n- Action ID: {}\n  Name: {}\n", action.id, action.name);
            if !action.description.trim().is_empty() {
                let _ = writeln!(block, "  Description: {}", action.description);
            }
            let required = describe_fields(action, true);
            if !required.is_empty() {
                let _ = writeln!(block, "  Required fields: {required}");
            }
            let optional = describe_fields(action, false);
            if !optional.is_empty() {
                let _ = writeln!(block, "  Optional fields: {optional}");
            }
        }

        block.push_str(
            "\nWhen the user's request matches one of these actions, reply with a short natural-language \
             message followed by a JSON object in exactly this shape:\n\
             {\"type\": \"action\", \"action_id\": \"<action id>\", \"confidence\": <number between 0 and 1>, \
             \"extracted_params\": {\"<field name>\": \"<value>\"}}\n\
             Use the field names listed above as keys in extracted_params. If a required field is missing, \
             ask the user for it instead of emitting the JSON. Never emit the JSON for requests that do not \
             match an action.",
        );
        block
    }
}

fn describe_fields(action: &ActionDefinition, required: bool) -> String {
    let fields: Vec<String> = if required {
        action.required_fields().map(|f| format!("{} ({})", f.name, f.field_type.as_str())).collect()
    } else {
        action.optional_fields().map(|f| format!("{} ({})", f.name, f.field_type.as_str())).collect()
    };
    fields.join(", ")
}

/// Escape text for inclusion in an HTML-aware prompt.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
