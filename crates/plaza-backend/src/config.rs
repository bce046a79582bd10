//! Backend connection configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Public (anon) API key
    pub anon_key: String,
    /// Database schema exposed by the table API
    pub schema: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Realtime heartbeat interval in seconds
    pub heartbeat_secs: u64,
    /// Where to persist the auth session between runs
    pub session_file: Option<PathBuf>,
}

impl BackendConfig {
    /// Create config for a project URL and key
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            ..Self::default()
        }
    }

    /// With session persistence file
    #[inline]
    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Heartbeat interval as a duration (never zero)
    #[inline]
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    /// Check that the mandatory fields are present
    pub fn validate(&self) -> Result<(), crate::BackendError> {
        if self.url.trim().is_empty() {
            return Err(crate::BackendError::Config("backend url is empty".into()));
        }
        if self.anon_key.trim().is_empty() {
            return Err(crate::BackendError::Config("anon key is empty".into()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(crate::BackendError::Config(format!(
                "backend url must be http(s): {}",
                self.url
            )));
        }
        Ok(())
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            schema: "public".to_string(),
            request_timeout_secs: 30,
            heartbeat_secs: 25,
            session_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_trailing_slash() {
        let config = BackendConfig::new("https://demo.supabase.co/", "key");
        assert_eq!(config.base_url(), "https://demo.supabase.co");
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(BackendConfig::default().validate().is_err());
        assert!(BackendConfig::new("https://x.co", "").validate().is_err());
        assert!(BackendConfig::new("ftp://x.co", "key").validate().is_err());
        assert!(BackendConfig::new("https://x.co", "key").validate().is_ok());
    }

    #[test]
    fn heartbeat_never_zero() {
        let mut config = BackendConfig::default();
        config.heartbeat_secs = 0;
        assert_eq!(config.heartbeat(), Duration::from_secs(1));
    }
}
