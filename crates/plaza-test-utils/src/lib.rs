//! Testing utilities for the Plaza workspace
//!
//! Shared fixtures over the in-memory backend, plus a callback recorder.

#![allow(missing_docs)]

use parking_lot::Mutex;
use plaza_backend::{AuthUser, Backend, MemoryBackend};
use plaza_core::tables::{POSTS, USER_PROFILES};
use plaza_core::{social_schema, Plaza, PlazaConfig, PostId, UserId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_PASSWORD: &str = "secret123";

pub fn memory_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::with_schema(social_schema()))
}

/// Plaza over a fresh in-memory backend, with the restore started
pub fn setup_plaza() -> (Arc<MemoryBackend>, Plaza) {
    let backend = memory_backend();
    let plaza = Plaza::start(backend.clone() as Arc<dyn Backend>, PlazaConfig::new());
    (backend, plaza)
}

/// Plaza restoring the session of a seeded account
pub fn setup_plaza_signed_in(email: &str, display_name: &str) -> (Arc<MemoryBackend>, Plaza, UserId) {
    let backend = memory_backend();
    let user = seed_account(&backend, email, display_name);
    let id = UserId(user.id);
    backend.set_session(Some(user));
    let plaza = Plaza::start(backend.clone() as Arc<dyn Backend>, PlazaConfig::new());
    (backend, plaza, id)
}

/// Account plus profile row; password is [`TEST_PASSWORD`]
pub fn seed_user(backend: &MemoryBackend, email: &str, display_name: &str) -> UserId {
    UserId(seed_account(backend, email, display_name).id)
}

pub fn seed_account(backend: &MemoryBackend, email: &str, display_name: &str) -> AuthUser {
    let user = backend.register_user(email, TEST_PASSWORD).unwrap();
    backend
        .seed(
            USER_PROFILES,
            vec![json!({"id": user.id, "display_name": display_name, "bio": null, "career": null})],
        )
        .unwrap();
    user
}

pub fn seed_post(backend: &MemoryBackend, author: UserId, content: &str) -> PostId {
    let rows = backend
        .seed(
            POSTS,
            vec![json!({"content": content, "user_profile_id": author, "image_url": null})],
        )
        .unwrap();
    PostId(rows[0]["id"].as_i64().unwrap())
}

/// Records every value passed to its callbacks
#[derive(Debug)]
pub struct Recorder<T> {
    calls: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(T) + Send + Sync + 'static {
        let calls = Arc::clone(&self.calls);
        move |value| calls.lock().push(value)
    }

    pub fn calls(&self) -> Vec<T> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<T> {
        self.calls.lock().last().cloned()
    }

    /// Wait up to one second for at least `n` calls
    pub async fn wait_for(&self, n: usize) -> Vec<T> {
        eventually(|| self.len() >= n).await;
        self.calls()
    }
}

/// Poll `condition` every 5ms for up to one second
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within one second");
}
