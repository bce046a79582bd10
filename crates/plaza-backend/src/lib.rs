//! Plaza Backend - switchable client for the hosted backend service
//!
//! The app talks to one remote service that provides:
//! - Email/password authentication with persistent sessions
//! - A relational table store (select / insert / update / delete)
//! - Row-level realtime change feeds
//! - Object storage with public URLs
//!
//! All of it sits behind the [`Backend`] trait. [`HttpBackend`] speaks the
//! service's REST and websocket protocols; [`MemoryBackend`] is an in-process
//! stand-in with the same observable behaviour, used by tests and offline
//! runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use plaza_backend::{Backend, BackendConfig, Direction, HttpBackend, Query};
//!
//! # async fn example() -> Result<(), plaza_backend::BackendError> {
//! let backend = HttpBackend::new(BackendConfig::new("https://xyz.supabase.co", "anon-key"))?;
//! let rows = backend
//!     .select(&Query::table("posts").order("created_at", Direction::Descending).limit(5))
//!     .await?;
//! println!("{} posts", rows.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod query;
pub mod realtime;
pub mod storage;

pub use auth::{AuthUser, Credentials, Session};
pub use config::BackendConfig;
pub use error::BackendError;
pub use http::HttpBackend;
pub use memory::{MemoryBackend, Schema};
pub use query::{Delete, Direction, Filter, Insert, Order, Query, Update};
pub use realtime::{ChangeEvent, ChangeFilter, ChangeKind, ChangeSubscription};
pub use storage::Upload;

use async_trait::async_trait;
use serde_json::Value;

/// The remote service as seen by the app
///
/// Implementations must be cheap to share (`Arc<dyn Backend>`); they keep the
/// auth session internally so table and storage calls run as the signed-in
/// user.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create an account and sign it in
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser, BackendError>;

    /// Sign in with email and password
    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthUser, BackendError>;

    /// End the current session
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Identity of the current session, if any
    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError>;

    /// Change the signed-in user's password
    async fn update_password(&self, new_password: &str) -> Result<(), BackendError>;

    /// Run a read query
    ///
    /// For single-row queries the result holds exactly one row, and a query
    /// matching nothing fails with [`BackendError::NotFound`].
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Insert rows, returning them when the insert asks for it
    async fn insert(&self, insert: &Insert) -> Result<Vec<Value>, BackendError>;

    /// Update matching rows
    async fn update(&self, update: &Update) -> Result<(), BackendError>;

    /// Delete matching rows
    async fn delete(&self, delete: &Delete) -> Result<(), BackendError>;

    /// Store an object at `path` in `bucket`
    async fn upload(&self, bucket: &str, path: &str, upload: &Upload)
        -> Result<(), BackendError>;

    /// Public URL of an object (no request is made)
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Delete objects from `bucket`; unknown paths are ignored
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;

    /// Join a realtime channel listening for the given changes
    async fn subscribe(
        &self,
        channel: &str,
        filters: &[ChangeFilter],
    ) -> Result<ChangeSubscription, BackendError>;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
