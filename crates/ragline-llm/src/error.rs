#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication rejected by {provider} (status {status})")]
    Auth { provider: &'static str, status: u16 },

    #[error("rate limited by {provider}")]
    RateLimited { provider: &'static str },

    #[error("{provider} API request failed (status {status}): {detail}")]
    Api {
        provider: &'static str,
        status: u16,
        detail: String,
    },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("malformed response from {provider}: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: &'static str },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;
