//! Error types shared by the generation adapter and the workflows.

use thiserror::Error;

/// Failure of a single generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A required credential or setting is missing. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The service asked us to slow down (HTTP 429). Safe to retry later.
    #[error("rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Transport, authentication or quota failure reported by the service.
    #[error("AI service error: {message}")]
    Service { status: Option<u16>, message: String },

    /// A streamed response broke off part way.
    #[error("stream error: {0}")]
    Stream(String),

    /// The service answered but the payload could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service {
            status: None,
            message: msg.into(),
        }
    }

    /// Whether waiting and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Service {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// A correction run stopped at `chunk` (1-based position in the input).
#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("chunk {chunk} failed: {source}")]
    Generation {
        chunk: usize,
        #[source]
        source: GenerationError,
    },
    /// Block ids would run past `u32::MAX` after `id`.
    #[error("chunk {chunk}: no block id left after {id}")]
    IdOverflow { chunk: usize, id: u32 },
}

impl CorrectionError {
    pub fn chunk(&self) -> usize {
        match self {
            Self::Generation { chunk, .. } | Self::IdOverflow { chunk, .. } => *chunk,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Generation { source, .. } => source.is_retryable(),
            Self::IdOverflow { .. } => false,
        }
    }
}
