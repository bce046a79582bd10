//! Plaza Core - client-side data access for the social app
//!
//! Composes calls into the hosted backend ([`plaza_backend`]) into the app's
//! operations:
//! - Observable current-user state ([`UserStore`])
//! - Registration, login, logout and session restore ([`AuthService`])
//! - Posts with images, comments, global chat and profiles
//! - Realtime watches that can be stopped ([`Watch`])
//! - A live comment list per post ([`CommentThread`])
//!
//! # Example
//!
//! ```rust,ignore
//! use plaza_core::{Plaza, PlazaConfig};
//!
//! # async fn example() -> Result<(), plaza_core::PlazaError> {
//! let plaza = Plaza::connect(PlazaConfig::new().with_env())?;
//! let _sub = plaza.auth().subscribe(|user| println!("user: {:?}", user.email));
//! plaza.ready().await?;
//!
//! let signed_in = plaza.auth().login("ana@example.com", "secret").await?;
//! signed_in.profile.await?;
//! for post in plaza.posts().all().await? {
//!     println!("{}: {}", post.id, post.content);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod auth;
pub mod chat;
pub mod comments;
pub mod config;
pub mod error;
pub mod plaza;
pub mod posts;
pub mod profiles;
pub mod tables;
pub mod thread;
pub mod types;
pub mod users;
pub mod watch;

pub use auth::{AuthService, ProfileLoad, Readiness, SignedIn};
pub use chat::{ChatService, DEFAULT_HISTORY_LIMIT};
pub use comments::CommentService;
pub use config::PlazaConfig;
pub use error::PlazaError;
pub use plaza::Plaza;
pub use posts::PostService;
pub use profiles::ProfileService;
pub use tables::social_schema;
pub use thread::{CommentThread, SubmitOutcome};
pub use types::{
    ChatMessage, Comment, CommentId, MessageId, NewChatMessage, NewProfile, Post, PostId,
    ProfileDraft, ProfileSummary, ProfileUpdate, UserId, UserProfile,
};
pub use users::{CurrentUser, Subscription, UserPatch, UserStore};
pub use watch::Watch;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Plaza Core
    pub use crate::{
        AuthService, ChatService, CommentService, CommentThread, CurrentUser, Plaza, PlazaConfig,
        PlazaError, Post, PostId, PostService, ProfileService, UserId, UserStore, Watch,
    };
    pub use plaza_backend::{Backend, Upload};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
