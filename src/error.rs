//! Error taxonomy for the chunking and retrieval core.
//!
//! Every failure is surfaced to the immediate caller. The only "soft"
//! outcome in the pipeline, an empty retrieval below the similarity
//! threshold, is not an error at all: it is an empty
//! [`RetrievedContext`](crate::models::RetrievedContext).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    /// A caller-supplied parameter violates a stated precondition.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector length disagrees with the index dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding failed: {message}")]
    EmbeddingFailure { message: String, retryable: bool },

    #[error("Generation failed: {message}")]
    GenerationFailure { message: String, retryable: bool },

    #[error("{operation} timed out after {timeout:?}")]
    UpstreamTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{0} cancelled by caller")]
    Cancelled(&'static str),

    #[error("Index file is corrupt: {0}")]
    CorruptIndex(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RagError::InvalidArgument(msg.into())
    }

    /// Permanent embedding failure (bad request, malformed response).
    pub fn embedding(msg: impl Into<String>) -> Self {
        RagError::EmbeddingFailure {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Permanent generation failure (bad request, malformed response).
    pub fn generation(msg: impl Into<String>) -> Self {
        RagError::GenerationFailure {
            message: msg.into(),
            retryable: false,
        }
    }

    /// Whether a provider wrapper may retry the call that produced this error.
    ///
    /// Only transient upstream failures qualify. Timeouts and cancellation
    /// raised by the core are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::EmbeddingFailure { retryable, .. }
            | RagError::GenerationFailure { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
