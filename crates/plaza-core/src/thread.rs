//! Live comment list of one post
//!
//! A [`CommentThread`] joins the post's comment feed, loads the existing
//! comments and keeps the list current as comments arrive from the feed or
//! are submitted locally. A comment is only ever listed once.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::comments::CommentService;
use crate::error::PlazaError;
use crate::types::{Comment, PostId};
use crate::watch::Watch;

/// Outcome of [`CommentThread::submit`]
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Blank content; nothing was sent
    Ignored,
    /// The user must sign in first
    LoginRequired,
    /// The comment could not be posted
    Failed(PlazaError),
    /// The comment was posted
    Posted(Comment),
}

#[derive(Debug, Default)]
struct ThreadState {
    comments: Vec<Comment>,
    posting: bool,
    last_error: Option<String>,
}

impl ThreadState {
    fn push(&mut self, comment: Comment) -> bool {
        if self.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        self.comments.push(comment);
        true
    }
}

/// Comments of one post, kept live
pub struct CommentThread {
    post_id: PostId,
    service: CommentService,
    state: Arc<Mutex<ThreadState>>,
    watch: Mutex<Option<Watch>>,
}

impl CommentThread {
    /// Join the post's feed and load its comments
    ///
    /// Resolves once the initial load is done. Failures are recorded in
    /// [`CommentThread::last_error`]; the thread is usable (empty) either way.
    pub async fn open(service: CommentService, post_id: PostId) -> Self {
        let state = Arc::new(Mutex::new(ThreadState::default()));

        let sink = Arc::clone(&state);
        let watch = match service
            .watch_post(post_id, move |comment| {
                if sink.lock().push(comment) {
                    tracing::debug!(post = %post_id, "comment appended from feed");
                }
            })
            .await
        {
            Ok(watch) => Some(watch),
            Err(e) => {
                state.lock().last_error = Some(e.to_string());
                None
            }
        };

        let loaded = service.by_post(post_id).await;
        {
            let mut state = state.lock();
            match loaded {
                Ok(mut comments) => {
                    let arrived: Vec<Comment> = std::mem::take(&mut state.comments)
                        .into_iter()
                        .filter(|a| !comments.iter().any(|c| c.id == a.id))
                        .collect();
                    comments.extend(arrived);
                    state.comments = comments;
                }
                Err(e) => {
                    tracing::error!(post = %post_id, error = %e, "could not load comments");
                    state.last_error = Some(e.to_string());
                }
            }
        }

        Self {
            post_id,
            service,
            state,
            watch: Mutex::new(watch),
        }
    }

    /// Post this thread belongs to
    #[inline]
    #[must_use]
    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    /// Copy of the current list
    #[must_use]
    pub fn comments(&self) -> Vec<Comment> {
        self.state.lock().comments.clone()
    }

    /// Whether a submit is in flight
    #[must_use]
    pub fn is_posting(&self) -> bool {
        self.state.lock().posting
    }

    /// Message of the last recorded failure
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Whether the feed is still attached
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.watch.lock().as_ref().is_some_and(Watch::is_active)
    }

    /// Post a comment as the signed-in user
    pub async fn submit(&self, content: &str) -> SubmitOutcome {
        if content.trim().is_empty() {
            return SubmitOutcome::Ignored;
        }
        self.state.lock().posting = true;
        let result = self.service.add(content, self.post_id).await;

        let mut state = self.state.lock();
        state.posting = false;
        match result {
            Ok(comment) => {
                state.push(comment.clone());
                SubmitOutcome::Posted(comment)
            }
            Err(PlazaError::NotAuthenticated) => SubmitOutcome::LoginRequired,
            Err(e) => {
                state.last_error = Some(e.to_string());
                SubmitOutcome::Failed(e)
            }
        }
    }

    /// Leave the feed; the list stays as it is
    pub async fn close(&self) {
        let watch = self.watch.lock().take();
        if let Some(watch) = watch {
            watch.stop().await;
        }
    }
}

impl std::fmt::Debug for CommentThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentThread")
            .field("post_id", &self.post_id)
            .field("comments", &self.state.lock().comments.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ProfileService;
    use crate::tables::{social_schema, COMMENTS, POSTS, USER_PROFILES};
    use crate::types::UserId;
    use crate::users::{UserPatch, UserStore};
    use plaza_backend::{Backend, Insert, MemoryBackend};
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryBackend>, UserStore, CommentService, UserId) {
        let backend = Arc::new(MemoryBackend::with_schema(social_schema()));
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let users = UserStore::new();
        let service = CommentService::new(
            dyn_backend.clone(),
            users.clone(),
            ProfileService::new(dyn_backend),
        );
        let author = UserId::random();
        backend
            .seed(USER_PROFILES, vec![json!({"id": author, "display_name": "Ana"})])
            .unwrap();
        backend.seed(POSTS, vec![json!({"content": "p"})]).unwrap();
        backend
            .seed(
                COMMENTS,
                vec![json!({"content": "existing", "post_id": 1, "user_profile_id": author})],
            )
            .unwrap();
        (backend, users, service, author)
    }

    async fn wait_for_len(thread: &CommentThread, len: usize) {
        for _ in 0..100 {
            if thread.comments().len() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("thread never reached {len} comments");
    }

    #[tokio::test]
    async fn open_loads_existing_comments() {
        let (_, _, service, _) = setup().await;
        let thread = CommentThread::open(service, PostId(1)).await;

        assert!(thread.is_live());
        assert_eq!(thread.last_error(), None);
        assert_eq!(thread.comments()[0].content, "existing");
    }

    #[tokio::test]
    async fn blank_submit_is_ignored() {
        let (_, _, service, _) = setup().await;
        let thread = CommentThread::open(service, PostId(1)).await;
        assert!(matches!(thread.submit("   ").await, SubmitOutcome::Ignored));
    }

    #[tokio::test]
    async fn signed_out_submit_asks_for_login() {
        let (_, _, service, _) = setup().await;
        let thread = CommentThread::open(service, PostId(1)).await;

        assert!(matches!(thread.submit("hi").await, SubmitOutcome::LoginRequired));
        assert_eq!(thread.last_error(), None);
        assert!(!thread.is_posting());
    }

    #[tokio::test]
    async fn submitted_comment_is_listed_once() {
        let (_, users, service, author) = setup().await;
        users.update(&UserPatch::new().with_id(Some(author)));
        let thread = CommentThread::open(service, PostId(1)).await;

        let SubmitOutcome::Posted(comment) = thread.submit("mine").await else {
            panic!("expected a posted comment");
        };
        // the feed delivers the same row again
        tokio::time::sleep(Duration::from_millis(50)).await;

        let comments = thread.comments();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments.iter().filter(|c| c.id == comment.id).count(), 1);
    }

    #[tokio::test]
    async fn comments_from_others_arrive_live() {
        let (backend, _, service, author) = setup().await;
        let thread = CommentThread::open(service, PostId(1)).await;

        backend
            .insert(&Insert::into(COMMENTS).row(json!({
                "content": "from feed", "post_id": 1, "user_profile_id": author
            })))
            .await
            .unwrap();

        wait_for_len(&thread, 2).await;
        assert_eq!(thread.comments()[1].content, "from feed");
    }

    #[tokio::test]
    async fn close_leaves_the_feed() {
        let (backend, _, service, author) = setup().await;
        let thread = CommentThread::open(service, PostId(1)).await;
        assert_eq!(backend.feed_count(), 1);

        thread.close().await;
        assert!(!thread.is_live());
        assert_eq!(backend.feed_count(), 0);

        backend
            .insert(&Insert::into(COMMENTS).row(json!({
                "content": "late", "post_id": 1, "user_profile_id": author
            })))
            .await
            .unwrap();
        assert_eq!(thread.comments().len(), 1);
    }
}
