use thiserror::Error;

/// Failures surfaced by the AI providers and the orchestration layers.
///
/// Analysis runs never propagate these to the caller; the inspiration state
/// machine folds them into its `Error` state. Generation jobs carry them to
/// a terminal `Failed`/`TimedOut` status instead.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("API key is empty, please configure it in settings")]
    MissingApiKey,

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Protocol(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("job reported success but returned no artifact")]
    MissingArtifact,

    #[error("unrecognized job status \"{0}\"")]
    UnknownStatus(String),

    #[error("generation job failed: {0}")]
    JobFailed(String),

    #[error("generation job timed out before reaching a terminal status")]
    JobTimedOut,

    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    #[error("{0}")]
    Precondition(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("media file error: {0}")]
    Io(#[from] std::io::Error),
}

impl AiError {
    /// Shape a non-2xx response into an `Http` error, preferring the
    /// decoded provider message over the raw body.
    pub fn from_status(status: u16, provider_message: Option<String>) -> Self {
        AiError::Http {
            status,
            message: provider_message.unwrap_or_else(|| format!("HTTP error {}", status)),
        }
    }
}
