use ragline_llm::LlmError;

use crate::document::DocumentError;
use crate::vector_store::VectorStoreError;

/// Failure kinds surfaced by the retrieval pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding service error: {0}")]
    EmbeddingService(#[source] LlmError),

    #[error("generation service error: {0}")]
    GenerationService(#[source] LlmError),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl From<VectorStoreError> for RagError {
    fn from(e: VectorStoreError) -> Self {
        match e {
            VectorStoreError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            VectorStoreError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
