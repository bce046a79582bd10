//! Error types for the backend client
//!
//! Every failure coming back from the remote service (or the in-memory
//! stand-in) is reported as a [`BackendError`]. Callers mostly care about the
//! backend's message string, which [`BackendError::message`] exposes.

use reqwest::StatusCode;

/// Backend client error
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The service answered with a non-success status
    #[error("backend error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message reported by the service
        message: String,
    },

    /// A single-row lookup matched no row
    #[error("no rows returned for single-row query on `{table}`")]
    NotFound {
        /// Table that was queried
        table: String,
    },

    /// The operation needs a session and none is active
    #[error("no active session")]
    Unauthenticated,

    /// Invalid credentials or rejected auth request
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network / HTTP transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Realtime channel failure
    #[error("realtime error: {0}")]
    Realtime(String),

    /// Local I/O failure (session file)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Build an API error from a status code and message
    #[inline]
    pub fn api(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Api {
            status: status.as_u16(),
            message: message.into(),
        }
    }

    /// Build a not-found error for `table`
    #[inline]
    pub fn not_found(table: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
        }
    }

    /// The backend's message string, without the variant prefix
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::Auth(message) | Self::Realtime(message) | Self::Config(message) => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Whether this is a single-row lookup with no match
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_message_is_bare() {
        let err = BackendError::api(StatusCode::BAD_REQUEST, "duplicate key");
        assert_eq!(err.message(), "duplicate key");
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn not_found_is_detected() {
        let err = BackendError::not_found("posts");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("posts"));
        assert!(!BackendError::Unauthenticated.is_not_found());
    }
}
