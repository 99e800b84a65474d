use thiserror::Error;

/// Message shown to end users whenever a turn fails for a reason they cannot fix.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, I'm having trouble responding right now. Please try again later.";

/// Failure of a single LLM provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API key configured for provider {provider}")]
    KeyMissing { provider: String },

    #[error("transport error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    BadStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}

impl ProviderError {
    pub fn transport(provider: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ProviderError::Transport {
            provider: provider.into(),
            message: err.to_string(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable tag used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::KeyMissing { .. } => "key-missing",
            ProviderError::Transport { .. } => "transport-error",
            ProviderError::BadStatus { .. } => "bad-status",
            ProviderError::MalformedResponse { .. } => "malformed-response",
        }
    }
}

/// Top-level error type for a chat turn.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("origin not allowed: {0}")]
    ForbiddenOrigin(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("action dispatch failed: {0}")]
    Dispatch(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Text that is safe to show to the end user. Internal detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Validation(msg) => msg.clone(),
            ChatError::ForbiddenOrigin(_) => "Requests from this site are not allowed.".to_string(),
            ChatError::RateLimited => {
                "You're sending messages too quickly. Please wait a moment and try again."
                    .to_string()
            }
            ChatError::Configuration(_) => {
                "This chat is not configured correctly. Please contact the site owner.".to_string()
            }
            ChatError::Provider(_)
            | ChatError::Dispatch(_)
            | ChatError::Storage(_)
            | ChatError::Other(_) => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    /// HTTP status the gateway answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) => 400,
            ChatError::ForbiddenOrigin(_) => 403,
            ChatError::RateLimited => 429,
            ChatError::Configuration(_) => 500,
            ChatError::Provider(_) => 502,
            ChatError::Dispatch(_) | ChatError::Storage(_) | ChatError::Other(_) => 500,
        }
    }
}
