//! Embedding backend error types.

use thiserror::Error;

/// Errors that can occur when requesting embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding model is not installed on the server.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response did not carry one vector per input.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}
