use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiroccoError {
    #[error("unknown model: {model}")]
    UnknownModel {
        model: String,
        suggestions: Vec<String>,
    },

    #[error("no credentials for {provider} — model {model} unavailable")]
    AdapterUnavailable { model: String, provider: String },

    #[error("submission rejected by {provider}: {message}")]
    SubmissionFailed { provider: String, message: String },

    #[error("result retrieval failed for job {external_task_id} after {attempts} attempts")]
    ResultRetrievalExhausted {
        external_task_id: String,
        attempts: u32,
    },

    #[error("timed out after {elapsed_ms}ms waiting for job {external_task_id}")]
    Timeout {
        external_task_id: String,
        elapsed_ms: u64,
    },

    #[error("cancelled after {0}ms")]
    Cancelled(u64),

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for SiroccoError {
    fn from(e: std::io::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl SiroccoError {
    /// Returns true for transient errors: the poll loop treats these as
    /// "not yet terminal" and retries at the next scheduled interval.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout { .. } => true,
            Self::Upstream { status, .. } => {
                // 5xx = server error (retryable), 4xx = client error (not retryable)
                // status: None = ambiguous (not from HTTP) → safe default: NOT retryable
                status.is_some_and(|s| s >= 500)
            }
            Self::Request(_) => true, // connection errors may be transient
            _ => false,
        }
    }

    /// Produce the human-readable failure description written to a task's
    /// error_message field. Does not leak internal URLs or response bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownModel { model, suggestions } => {
                if suggestions.is_empty() {
                    format!("unknown model: {model}")
                } else {
                    format!(
                        "unknown model: {model}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::AdapterUnavailable { model, provider } => {
                format!("model {model} unavailable: {provider} credentials not configured")
            }
            Self::SubmissionFailed { provider, message } => {
                format!("submission rejected by {provider}: {message}")
            }
            Self::ResultRetrievalExhausted {
                external_task_id,
                attempts,
            } => {
                format!("could not retrieve result for job {external_task_id} after {attempts} attempts")
            }
            Self::Timeout {
                external_task_id,
                elapsed_ms,
            } => {
                format!(
                    "timed out after {}s waiting for job {external_task_id}",
                    elapsed_ms / 1000
                )
            }
            Self::Cancelled(_) => "cancelled".to_string(),
            Self::RateLimited { provider } => {
                format!("rate limited by {provider} — try again shortly")
            }
            Self::AuthFailed { provider, .. } => {
                format!("authentication failed for {provider}")
            }
            Self::Upstream { provider, .. } => {
                format!("upstream error from {provider}")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Store(msg) => format!("store error: {msg}"),
            Self::TaskNotFound(id) => format!("task not found: {id}"),
            Self::Other(msg) => msg.clone(),
        }
    }
}
