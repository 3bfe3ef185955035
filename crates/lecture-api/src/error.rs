//! API Error Types

use thiserror::Error;

/// Errors returned by backend calls.
///
/// Timeouts and transport failures share the `Http` variant; callers treat
/// them the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Request could not be sent or timed out
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Server answered with a non-success status
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Server answered `success: false`
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Client could not be constructed
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Http(err.to_string())
        }
    }
}
