//! Facade wiring one backend, one user store and every service

use plaza_backend::{Backend, HttpBackend, MemoryBackend};
use std::sync::Arc;

use crate::auth::AuthService;
use crate::chat::ChatService;
use crate::comments::CommentService;
use crate::config::PlazaConfig;
use crate::error::PlazaError;
use crate::posts::PostService;
use crate::profiles::ProfileService;
use crate::tables::social_schema;
use crate::thread::CommentThread;
use crate::types::PostId;
use crate::users::{CurrentUser, UserStore};

/// Entry point of the client
///
/// Cheap to clone; clones share the backend, the user store and readiness.
#[derive(Clone)]
pub struct Plaza {
    config: PlazaConfig,
    backend: Arc<dyn Backend>,
    users: UserStore,
    auth: AuthService,
    posts: PostService,
    comments: CommentService,
    chat: ChatService,
    profiles: ProfileService,
}

impl Plaza {
    /// Wire services over `backend` without restoring the session
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, config: PlazaConfig) -> Self {
        let users = UserStore::new();
        let profiles = ProfileService::new(Arc::clone(&backend));
        let auth = AuthService::new(Arc::clone(&backend), users.clone(), profiles.clone());
        let posts = PostService::new(Arc::clone(&backend), users.clone(), profiles.clone());
        let comments = CommentService::new(Arc::clone(&backend), users.clone(), profiles.clone());
        let chat = ChatService::new(Arc::clone(&backend), users.clone(), profiles.clone())
            .with_history_limit(config.chat_history_limit);
        Self {
            config,
            backend,
            users,
            auth,
            posts,
            comments,
            chat,
            profiles,
        }
    }

    /// Wire services and start the session restore in the background
    ///
    /// Must be called inside a tokio runtime. Await [`Plaza::ready`] to know
    /// when the restore finished.
    #[must_use]
    pub fn start(backend: Arc<dyn Backend>, config: PlazaConfig) -> Self {
        let plaza = Self::new(backend, config);
        plaza.auth.start_restore();
        tracing::info!("plaza started");
        plaza
    }

    /// Connect to the hosted backend described by `config` and start
    pub fn connect(config: PlazaConfig) -> Result<Self, PlazaError> {
        config.validate()?;
        let backend = HttpBackend::new(config.backend.clone())
            .map_err(|e| PlazaError::Initialization(e.message()))?;
        tracing::info!(url = %config.backend.base_url(), "connecting to backend");
        Ok(Self::start(Arc::new(backend), config))
    }

    /// Start over an in-memory backend with the app's schema
    #[must_use]
    pub fn in_memory(config: PlazaConfig) -> Self {
        Self::start(Arc::new(MemoryBackend::with_schema(social_schema())), config)
    }

    /// Wait for the startup restore
    pub async fn ready(&self) -> Result<Option<CurrentUser>, PlazaError> {
        self.auth.ready().await
    }

    /// Open a live comment thread for `post_id`
    pub async fn comment_thread(&self, post_id: PostId) -> CommentThread {
        CommentThread::open(self.comments.clone(), post_id).await
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PlazaConfig {
        &self.config
    }

    /// Backend in use
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Shared user store
    #[inline]
    #[must_use]
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Authentication
    #[inline]
    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Posts
    #[inline]
    #[must_use]
    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    /// Comments
    #[inline]
    #[must_use]
    pub fn comments(&self) -> &CommentService {
        &self.comments
    }

    /// Global chat
    #[inline]
    #[must_use]
    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    /// Profiles
    #[inline]
    #[must_use]
    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }
}

impl std::fmt::Debug for Plaza {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plaza")
            .field("config", &self.config)
            .field("users", &self.users)
            .finish_non_exhaustive()
    }
}
