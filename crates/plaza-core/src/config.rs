//! Application configuration
//!
//! Read from TOML, then overridden from the environment:
//!
//! | Variable             | Field                  |
//! |----------------------|------------------------|
//! | `PLAZA_URL`          | `backend.url`          |
//! | `PLAZA_ANON_KEY`     | `backend.anon_key`     |
//! | `PLAZA_SESSION_FILE` | `backend.session_file` |
//! | `PLAZA_LOG`          | `log_filter`           |

use plaza_backend::BackendConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chat::DEFAULT_HISTORY_LIMIT;
use crate::error::PlazaError;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlazaConfig {
    /// Backend connection
    pub backend: BackendConfig,
    /// Messages returned by the chat history
    pub chat_history_limit: usize,
    /// Default tracing filter directive
    pub log_filter: String,
}

impl PlazaConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backend connection
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// With chat history limit
    #[inline]
    #[must_use]
    pub fn with_chat_history_limit(mut self, limit: usize) -> Self {
        self.chat_history_limit = limit;
        self
    }

    /// With log filter
    #[inline]
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Parse TOML
    pub fn from_toml_str(text: &str) -> Result<Self, PlazaError> {
        toml::from_str(text).map_err(|e| PlazaError::Config(e.to_string()))
    }

    /// Read a TOML file
    pub fn load(path: &Path) -> Result<Self, PlazaError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PlazaError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, PlazaError> {
        toml::to_string_pretty(self).map_err(|e| PlazaError::Config(e.to_string()))
    }

    /// Apply `PLAZA_*` overrides from the process environment
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `PLAZA_*` overrides from `lookup`
    #[must_use]
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = get("PLAZA_URL") {
            self.backend.url = url;
        }
        if let Some(key) = get("PLAZA_ANON_KEY") {
            self.backend.anon_key = key;
        }
        if let Some(path) = get("PLAZA_SESSION_FILE") {
            self.backend.session_file = Some(PathBuf::from(path));
        }
        if let Some(filter) = get("PLAZA_LOG") {
            self.log_filter = filter;
        }
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), PlazaError> {
        self.backend
            .validate()
            .map_err(|e| PlazaError::Config(e.message()))?;
        if self.chat_history_limit == 0 {
            return Err(PlazaError::Config("chat_history_limit must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for PlazaConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            chat_history_limit: DEFAULT_HISTORY_LIMIT,
            log_filter: "info".to_string(),
        }
    }
}
