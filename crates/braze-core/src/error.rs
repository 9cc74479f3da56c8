//! Unified error types for gateway API calls.

use thiserror::Error;

/// Errors that can occur when calling an outbound gateway action.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The gateway connection is not established.
    #[error("gateway not connected")]
    NotConnected,

    /// The gateway reported a failure for this action.
    #[error("action '{action}' failed: {message}")]
    ActionFailed {
        /// The action that failed.
        action: String,
        /// Failure description from the gateway.
        message: String,
    },

    /// The call did not complete within the gateway's deadline.
    #[error("action '{action}' timed out")]
    Timeout {
        /// The action that timed out.
        action: String,
    },

    /// The response could not be decoded into the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The call was rejected before reaching the gateway.
    #[error("invalid call: {0}")]
    InvalidCall(String),
}

/// Result type for gateway API calls.
pub type ApiResult<T> = Result<T, ApiError>;
