//! Observable current-user state
//!
//! [`UserStore`] is the single record of who is signed in:
//! - `update` shallow-merges a [`UserPatch`] and notifies every subscriber
//! - `subscribe` calls back immediately, then on every change
//! - callbacks run after the lock is released, so they may read the store
//!
//! There is no dirty check; an update that changes nothing still notifies.

use parking_lot::Mutex;
use plaza_backend::AuthUser;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

use crate::types::{UserId, UserProfile};

/// Snapshot of the current user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Auth user ID; `None` when signed out
    pub id: Option<UserId>,
    /// Sign-in email
    pub email: Option<String>,
    /// Public name
    pub display_name: Option<String>,
    /// Free-form bio
    pub bio: Option<String>,
    /// Career / field of study
    pub career: Option<String>,
    /// Public avatar URL
    pub avatar_url: Option<String>,
}

impl CurrentUser {
    /// Whether a user is signed in
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

/// Partial update of [`CurrentUser`]
///
/// An outer `None` leaves the field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::option_option)]
pub struct UserPatch {
    /// New ID
    pub id: Option<Option<UserId>>,
    /// New email
    pub email: Option<Option<String>>,
    /// New display name
    pub display_name: Option<Option<String>>,
    /// New bio
    pub bio: Option<Option<String>>,
    /// New career
    pub career: Option<Option<String>>,
    /// New avatar URL
    pub avatar_url: Option<Option<String>>,
}

impl UserPatch {
    /// Patch that changes nothing
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity fields of a freshly signed-in user
    #[must_use]
    pub fn signed_in(user: &AuthUser) -> Self {
        Self::new()
            .with_id(Some(UserId(user.id)))
            .with_email(user.email.clone())
    }

    /// Every profile field (the ID is included; it equals the auth ID)
    #[must_use]
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self::new()
            .with_id(Some(profile.id))
            .with_display_name(profile.display_name.clone())
            .with_bio(profile.bio.clone())
            .with_career(profile.career.clone())
            .with_avatar_url(profile.avatar_url.clone())
    }

    /// Replace ID
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: Option<UserId>) -> Self {
        self.id = Some(id);
        self
    }

    /// Replace email
    #[inline]
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = Some(email);
        self
    }

    /// Replace display name
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = Some(name);
        self
    }

    /// Replace bio
    #[inline]
    #[must_use]
    pub fn with_bio(mut self, bio: Option<String>) -> Self {
        self.bio = Some(bio);
        self
    }

    /// Replace career
    #[inline]
    #[must_use]
    pub fn with_career(mut self, career: Option<String>) -> Self {
        self.career = Some(career);
        self
    }

    /// Replace avatar URL
    #[inline]
    #[must_use]
    pub fn with_avatar_url(mut self, url: Option<String>) -> Self {
        self.avatar_url = Some(url);
        self
    }

    /// Whether the patch touches no field
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `user`
    pub fn apply(&self, user: &mut CurrentUser) {
        fn merge<T: Clone>(slot: &mut Option<T>, value: &Option<Option<T>>) {
            if let Some(value) = value {
                slot.clone_from(value);
            }
        }
        merge(&mut user.id, &self.id);
        merge(&mut user.email, &self.email);
        merge(&mut user.display_name, &self.display_name);
        merge(&mut user.bio, &self.bio);
        merge(&mut user.career, &self.career);
        merge(&mut user.avatar_url, &self.avatar_url);
    }
}

type Callback = Arc<dyn Fn(CurrentUser) + Send + Sync>;

#[derive(Default)]
struct Inner {
    state: CurrentUser,
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
}

/// Shared, observable current-user record
#[derive(Clone, Default)]
pub struct UserStore {
    inner: Arc<Mutex<Inner>>,
}

impl UserStore {
    /// Signed-out store with no subscribers
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` and notify every subscriber with the result
    pub fn update(&self, patch: &UserPatch) {
        let (state, subscribers) = {
            let mut inner = self.inner.lock();
            patch.apply(&mut inner.state);
            (inner.state.clone(), Self::callbacks(&inner))
        };
        tracing::debug!(
            authenticated = state.is_authenticated(),
            subscribers = subscribers.len(),
            "user state updated"
        );
        for callback in subscribers {
            callback(state.clone());
        }
    }

    /// Clear every field and notify once
    pub fn reset(&self) {
        let subscribers = {
            let mut inner = self.inner.lock();
            inner.state = CurrentUser::default();
            Self::callbacks(&inner)
        };
        tracing::debug!(subscribers = subscribers.len(), "user state reset");
        for callback in subscribers {
            callback(CurrentUser::default());
        }
    }

    /// Register `callback`; it is invoked right away with the current record
    #[must_use = "dropping the subscription unsubscribes"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(CurrentUser) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let (id, state) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push((id, Arc::clone(&callback)));
            (id, inner.state.clone())
        };
        callback(state);
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// The record, if a user is signed in
    #[must_use]
    pub fn current(&self) -> Option<CurrentUser> {
        let inner = self.inner.lock();
        inner.state.is_authenticated().then(|| inner.state.clone())
    }

    /// The record, signed in or not
    #[must_use]
    pub fn snapshot(&self) -> CurrentUser {
        self.inner.lock().state.clone()
    }

    /// ID of the signed-in user
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.inner.lock().state.id
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn callbacks(inner: &Inner) -> Vec<Callback> {
        inner
            .subscribers
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("UserStore")
            .field("state", &inner.state)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

/// Handle to a store subscription
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes the callback.
#[must_use = "dropping the subscription unsubscribes"]
pub struct Subscription {
    id: u64,
    store: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Remove the callback now
    pub fn unsubscribe(self) {}

    fn remove(&self) {
        if let Some(inner) = self.store.upgrade() {
            inner.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
