//! Error types for the GitHub client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the GitHub API
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("GitHub API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Failed to parse a response body
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// App credentials are missing or unusable
    #[error("App authentication error: {0}")]
    AuthError(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if retrying the call later could succeed
    ///
    /// Network failures and 5xx responses are transient; auth and 4xx
    /// responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::ParseError(_) | Self::AuthError(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        assert!(ClientError::api_error(503, "unavailable").is_transient());
        assert!(ClientError::api_error(429, "rate limited").is_transient());
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(!ClientError::api_error(401, "bad credentials").is_transient());
        assert!(!ClientError::api_error(404, "missing").is_transient());
        assert!(!ClientError::AuthError("no key".to_string()).is_transient());
    }
}
