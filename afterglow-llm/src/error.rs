//! Generation error types.

use thiserror::Error;

/// Errors from the caption, chat and diary service.
///
/// Every variant is recoverable: callers switch to a local fallback.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// HTTP request failed or returned a non-success status.
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    /// Response body was not valid JSON.
    #[error("Failed to parse generation response as JSON: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("Generation request timed out after {0}ms")]
    Timeout(u64),

    /// No service is configured or it cannot be reached.
    #[error("Generation service unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All generation attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// Configuration error.
    #[error("Generation configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout(0)
        } else if err.is_connect() {
            GenerationError::Unavailable(err.to_string())
        } else {
            GenerationError::RequestFailed(err.to_string())
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, GenerationError>;
