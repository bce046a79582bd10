//! Authentication flow
//!
//! Wraps the backend's auth calls and keeps the [`UserStore`] in sync:
//! - `register` signs up, creates the profile row, then merges the identity
//! - `login` merges the identity before returning and loads the profile in
//!   the background ([`SignedIn::profile`])
//! - `logout` resets the store
//! - `restore` / `ready` cover the session restore done at startup

use plaza_backend::{AuthUser, Backend, Credentials, Upload};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{BackendResultExt, PlazaError};
use crate::profiles::ProfileService;
use crate::types::{ProfileDraft, ProfileUpdate, UserId, UserProfile};
use crate::users::{CurrentUser, Subscription, UserPatch, UserStore};

/// State of the startup session restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Restore still running (or not started)
    Pending,
    /// Restore finished; holds the restored user, if any
    Ready(Option<CurrentUser>),
    /// Restore failed with this message
    Failed(String),
}

/// Handle to a background profile load started by `login`
///
/// Awaiting it yields the loaded profile; dropping it lets the load finish
/// on its own.
#[must_use = "await the handle to observe the profile load"]
pub struct ProfileLoad {
    handle: JoinHandle<Result<UserProfile, PlazaError>>,
}

impl ProfileLoad {
    /// Whether the load has completed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ProfileLoad {
    type Output = Result<UserProfile, PlazaError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(PlazaError::Task(e.to_string()))),
        }
    }
}

impl std::fmt::Debug for ProfileLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileLoad")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Result of a successful login
#[derive(Debug)]
pub struct SignedIn {
    /// The authenticated identity
    pub user: AuthUser,
    /// Background load of the extended profile
    pub profile: ProfileLoad,
}

/// Authentication operations bound to one user store
#[derive(Clone)]
pub struct AuthService {
    backend: Arc<dyn Backend>,
    users: UserStore,
    profiles: ProfileService,
    readiness: Arc<watch::Sender<Readiness>>,
}

impl AuthService {
    /// Create service; readiness starts as [`Readiness::Pending`]
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, users: UserStore, profiles: ProfileService) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            backend,
            users,
            profiles,
            readiness: Arc::new(readiness),
        }
    }

    /// Create an account, its profile row, and sign it in
    ///
    /// A failure creating the profile row is logged and not returned; the
    /// drafted fields are only merged into the store when it succeeded.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        draft: ProfileDraft,
    ) -> Result<AuthUser, PlazaError> {
        let user = self
            .backend
            .sign_up(&Credentials::new(email, password))
            .await
            .context("register")?;
        let id = UserId(user.id);

        let mut patch = UserPatch::signed_in(&user);
        match self.profiles.add(&draft.clone().into_profile(id)).await {
            Ok(()) => {
                patch = patch
                    .with_display_name(draft.display_name)
                    .with_bio(draft.bio)
                    .with_career(draft.career);
            }
            Err(e) => tracing::warn!(user = %id, error = %e, "registered without a profile row"),
        }

        self.users.update(&patch);
        tracing::info!(user = %id, "registered");
        Ok(user)
    }

    /// Sign in with email and password
    ///
    /// `id` and `email` are in the store when this returns; the rest of the
    /// profile arrives through [`SignedIn::profile`].
    pub async fn login(&self, email: &str, password: &str) -> Result<SignedIn, PlazaError> {
        let user = self
            .backend
            .sign_in_with_password(&Credentials::new(email, password))
            .await
            .context("log in")?;
        let id = UserId(user.id);
        self.users.update(&UserPatch::signed_in(&user));
        tracing::info!(user = %id, "logged in");

        let auth = self.clone();
        let handle = tokio::spawn(async move { auth.load_profile(id).await });
        Ok(SignedIn {
            user,
            profile: ProfileLoad { handle },
        })
    }

    /// Sign out and clear the store
    ///
    /// A backend failure is logged; the local state is cleared regardless.
    pub async fn logout(&self) {
        if let Err(e) = self.backend.sign_out().await {
            tracing::warn!(error = %e, "backend sign-out failed");
        }
        self.users.reset();
        tracing::info!("logged out");
    }

    /// Change the signed-in user's profile fields
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), PlazaError> {
        let id = self.require_user()?;
        self.profiles.update(id, update).await?;

        self.users.update(&UserPatch {
            display_name: update.display_name.clone(),
            bio: update.bio.clone(),
            career: update.career.clone(),
            avatar_url: update.avatar_url.clone(),
            ..UserPatch::new()
        });
        Ok(())
    }

    /// Change the signed-in user's password
    pub async fn change_password(&self, new_password: &str) -> Result<(), PlazaError> {
        self.require_user()?;
        if new_password.is_empty() {
            return Err(PlazaError::InvalidInput("password must not be empty".into()));
        }
        self.backend
            .update_password(new_password)
            .await
            .context("change password")?;
        tracing::info!("password changed");
        Ok(())
    }

    /// Upload a new avatar, store its URL on the profile and return it
    pub async fn update_avatar(&self, upload: &Upload) -> Result<String, PlazaError> {
        let id = self.require_user()?;
        let url = self.profiles.upload_avatar(id, upload).await?;
        self.profiles
            .update(id, &ProfileUpdate::new().with_avatar_url(url.clone()))
            .await?;
        self.users
            .update(&UserPatch::new().with_avatar_url(Some(url.clone())));
        Ok(url)
    }

    /// Load the backend session and, if there is one, the user's profile
    ///
    /// Marks readiness as ready or failed when done.
    pub async fn restore(&self) -> Result<Option<CurrentUser>, PlazaError> {
        let result = self.restore_inner().await;
        let state = match &result {
            Ok(user) => Readiness::Ready(user.clone()),
            Err(e) => {
                tracing::error!(error = %e, "session restore failed");
                Readiness::Failed(e.to_string())
            }
        };
        self.readiness.send_replace(state);
        result
    }

    async fn restore_inner(&self) -> Result<Option<CurrentUser>, PlazaError> {
        let Some(user) = self.backend.get_user().await.context("load session")? else {
            tracing::debug!("no stored session");
            return Ok(None);
        };
        let id = UserId(user.id);
        self.users.update(&UserPatch::signed_in(&user));
        tracing::info!(user = %id, "session restored");

        self.load_profile(id).await?;
        Ok(self.users.current())
    }

    /// Run [`AuthService::restore`] in the background
    pub fn start_restore(&self) -> JoinHandle<()> {
        let auth = self.clone();
        tokio::spawn(async move {
            let _ = auth.restore().await;
        })
    }

    /// Wait for the startup restore to finish
    ///
    /// Resolves with the restored user (or `None`), or fails with
    /// [`PlazaError::Initialization`] when the restore failed.
    pub async fn ready(&self) -> Result<Option<CurrentUser>, PlazaError> {
        let mut rx = self.readiness.subscribe();
        let state = match rx.wait_for(|state| *state != Readiness::Pending).await {
            Ok(state) => (*state).clone(),
            Err(_) => return Err(PlazaError::Initialization("readiness channel closed".into())),
        };
        match state {
            Readiness::Ready(user) => Ok(user),
            Readiness::Failed(message) => Err(PlazaError::Initialization(message)),
            Readiness::Pending => Ok(None),
        }
    }

    /// Current readiness without waiting
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        (*self.readiness.borrow()).clone()
    }

    /// Observe the current user
    #[must_use = "dropping the subscription unsubscribes"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(CurrentUser) + Send + Sync + 'static,
    {
        self.users.subscribe(callback)
    }

    /// Signed-in user, if any
    #[must_use]
    pub fn current(&self) -> Option<CurrentUser> {
        self.users.current()
    }

    /// The underlying store
    #[inline]
    #[must_use]
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    fn require_user(&self) -> Result<UserId, PlazaError> {
        self.users.user_id().ok_or(PlazaError::NotAuthenticated)
    }

    async fn load_profile(&self, id: UserId) -> Result<UserProfile, PlazaError> {
        let profile = self.profiles.by_id(id).await?;
        if self.users.user_id() == Some(id) {
            self.users.update(&UserPatch::from_profile(&profile));
        } else {
            tracing::debug!(user = %id, "user changed before profile arrived, not merging");
        }
        Ok(profile)
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("users", &self.users)
            .field("readiness", &self.readiness())
            .finish_non_exhaustive()
    }
}
