//! Error types for Plaza Core
//!
//! Feature operations fail in a handful of ways:
//! - The caller is not signed in (checked locally, before any remote call)
//! - A backend call failed (wraps the backend's own message)
//! - A sender's profile row is missing
//! - Input was rejected before reaching the backend
//! - The startup session restore failed

use plaza_backend::BackendError;

use crate::types::UserId;

/// Main Plaza error type
#[derive(Debug, thiserror::Error)]
pub enum PlazaError {
    /// Operation needs a signed-in user
    #[error("user is not authenticated")]
    NotAuthenticated,

    /// A backend call failed
    #[error("could not {operation}: {}", .source.message())]
    Backend {
        /// What was being attempted, e.g. `create post`
        operation: &'static str,
        /// The backend failure
        source: BackendError,
    },

    /// No profile row exists for the user
    #[error("no profile found for user {0}")]
    ProfileNotFound(UserId),

    /// Input rejected before any remote call
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A row did not have the expected shape
    #[error("unexpected row shape: {0}")]
    Decode(#[from] serde_json::Error),

    /// Startup session restore failed
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),
}

impl PlazaError {
    /// Whether a single-row lookup matched nothing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_not_found())
    }

    /// Whether the failure is the local authentication guard
    #[inline]
    #[must_use]
    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, Self::NotAuthenticated)
    }

    /// The backend's message, for backend failures
    #[must_use]
    pub fn backend_message(&self) -> Option<String> {
        match self {
            Self::Backend { source, .. } => Some(source.message()),
            _ => None,
        }
    }
}

/// Log-and-wrap for backend results
pub(crate) trait BackendResultExt<T> {
    /// Log the failure and wrap it as [`PlazaError::Backend`]
    fn context(self, operation: &'static str) -> Result<T, PlazaError>;
}

impl<T> BackendResultExt<T> for Result<T, BackendError> {
    fn context(self, operation: &'static str) -> Result<T, PlazaError> {
        self.map_err(|source| {
            tracing::error!(operation, error = %source, "backend call failed");
            PlazaError::Backend { operation, source }
        })
    }
}
