use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// 5xx-class failure; safe to retry with backoff.
    #[error("Backend returned {status}: {message}")]
    TransientBackend { status: u16, message: String },

    /// Permission or scope failure reported by a backend call.
    #[error("Access restricted: {0}")]
    AccessRestricted(String),

    /// Surfaced to callers once tool fallback could not recover an access restriction.
    #[error("Elevated access required: {0}")]
    ElevatedAccessRequired(String),

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("External service unreachable: {0}")]
    ExternalServiceUnreachable(String),

    #[error("Video generation failed: {0}")]
    VideoFailed(String),

    #[error("Video generation still running after {attempts} polls")]
    VideoTimeout { attempts: u32 },

    #[error("Backend returned empty response")]
    EmptyResponse,
}

impl InferError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InferError::TransientBackend { .. })
    }

    pub fn is_access_restricted(&self) -> bool {
        matches!(
            self,
            InferError::AccessRestricted(_) | InferError::ElevatedAccessRequired(_)
        )
    }

    /// Promote a backend access restriction to the caller-facing condition
    pub fn into_elevated(self) -> Self {
        match self {
            InferError::AccessRestricted(message) => InferError::ElevatedAccessRequired(message),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, InferError>;
