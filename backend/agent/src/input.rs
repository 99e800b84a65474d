//! Inbound message checks: length, blankness, origin, and HTML sanitizing.

use std::sync::LazyLock;

use regex::Regex;

use flowchat_core::ChatError;

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Inline tags that survive sanitizing. Attributes are always dropped.
pub const ALLOWED_TAGS: &[&str] = &["b", "strong", "i", "em", "u", "br", "code"];

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>").unwrap());

pub fn validate_message(message: &str) -> Result<(), ChatError> {
    if message.trim().is_empty() {
        return Err(ChatError::Validation("Message cannot be empty.".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::Validation(format!(
            "Message is too long. Maximum length is {MAX_MESSAGE_CHARS} characters."
        )));
    }
    Ok(())
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// An absent `Origin` header is accepted, as is any origin when no hosting site is configured.
pub fn check_origin(origin: Option<&str>, allowed: &[String]) -> Result<(), ChatError> {
    let Some(origin) = origin else {
        return Ok(());
    };
    if allowed.is_empty() {
        return Ok(());
    }
    let origin = normalize_origin(origin);
    if allowed.iter().any(|a| normalize_origin(a) == origin) {
        Ok(())
    } else {
        Err(ChatError::ForbiddenOrigin(origin))
    }
}

/// Strip every tag outside [`ALLOWED_TAGS`], keeping inner text.
/// Script and style blocks are removed together with their content.
pub fn sanitize_message(message: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(message, "");
    let cleaned = TAG_RE.replace_all(&without_scripts, |caps: &regex::Captures| {
        let closing = &caps[1];
        let name = caps[2].to_ascii_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            return String::new();
        }
        if name == "br" {
            "<br>".to_string()
        } else {
            format!("<{closing}{name}>")
        }
    });
    cleaned.trim().to_string()
}
