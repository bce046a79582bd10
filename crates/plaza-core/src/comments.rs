//! Comments on posts

use plaza_backend::{Backend, ChangeFilter, Delete, Direction, Insert, Query};
use serde_json::json;
use std::sync::Arc;

use crate::error::{BackendResultExt, PlazaError};
use crate::profiles::ProfileService;
use crate::tables::{first_row, COMMENTS, COMMENT_SELECT};
use crate::types::{decode, decode_all, Comment, CommentId, PostId, UserId};
use crate::users::UserStore;
use crate::watch::{decode_record, Watch};

/// Comment operations
#[derive(Clone)]
pub struct CommentService {
    backend: Arc<dyn Backend>,
    users: UserStore,
    profiles: ProfileService,
}

impl CommentService {
    /// Create service
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, users: UserStore, profiles: ProfileService) -> Self {
        Self {
            backend,
            users,
            profiles,
        }
    }

    /// Comment on a post as the signed-in user
    pub async fn add(&self, content: &str, post_id: PostId) -> Result<Comment, PlazaError> {
        let user_id = self.users.user_id().ok_or(PlazaError::NotAuthenticated)?;
        let profile_id = self
            .profiles
            .lookup_id(user_id, "look up comment author")
            .await?;

        let rows = self
            .backend
            .insert(
                &Insert::into(COMMENTS)
                    .row(json!({
                        "content": content,
                        "post_id": post_id,
                        "user_id": user_id,
                        "user_profile_id": profile_id,
                    }))
                    .returning(COMMENT_SELECT),
            )
            .await
            .context("add comment")?;
        let comment: Comment = decode(first_row(rows, COMMENTS).context("add comment")?)?;
        tracing::info!(comment = %comment.id, post = %post_id, "comment added");
        Ok(comment)
    }

    /// Comments of a post, oldest first
    pub async fn by_post(&self, post_id: PostId) -> Result<Vec<Comment>, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(COMMENTS)
                    .select(COMMENT_SELECT)
                    .eq("post_id", post_id)
                    .order("created_at", Direction::Ascending),
            )
            .await
            .context("fetch post comments")?;
        decode_all(rows)
    }

    /// Comments by one author, newest first
    pub async fn by_user(&self, profile_id: UserId) -> Result<Vec<Comment>, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(COMMENTS)
                    .select(COMMENT_SELECT)
                    .eq("user_profile_id", profile_id)
                    .order("created_at", Direction::Descending),
            )
            .await
            .context("fetch user comments")?;
        decode_all(rows)
    }

    /// One comment with its author
    pub async fn by_id(&self, comment_id: CommentId) -> Result<Comment, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(COMMENTS)
                    .select(COMMENT_SELECT)
                    .eq("id", comment_id)
                    .single(),
            )
            .await
            .context("fetch comment")?;
        decode(first_row(rows, COMMENTS).context("fetch comment")?)
    }

    /// Delete a comment
    pub async fn delete(&self, comment_id: CommentId) -> Result<(), PlazaError> {
        self.backend
            .delete(&Delete::from_table(COMMENTS).eq("id", comment_id))
            .await
            .context("delete comment")?;
        tracing::info!(comment = %comment_id, "comment deleted");
        Ok(())
    }

    /// New comments by one author, as raw rows
    pub async fn watch_user<F>(&self, profile_id: UserId, callback: F) -> Result<Watch, PlazaError>
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        let subscription = self
            .backend
            .subscribe(
                &format!("user-comments-{profile_id}"),
                &[ChangeFilter::inserts(COMMENTS).where_eq("user_profile_id", profile_id)],
            )
            .await
            .context("watch user comments")?;
        Ok(Watch::spawn(subscription, move |event| {
            if let Some(comment) = decode_record(&event) {
                callback(comment);
            }
            std::future::ready(())
        }))
    }

    /// New comments on one post, re-fetched with their author
    pub async fn watch_post<F>(&self, post_id: PostId, callback: F) -> Result<Watch, PlazaError>
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        let subscription = self
            .backend
            .subscribe(
                &format!("post-comments-{post_id}"),
                &[ChangeFilter::inserts(COMMENTS).where_eq("post_id", post_id)],
            )
            .await
            .context("watch post comments")?;
        let service = self.clone();
        let callback = Arc::new(callback);
        Ok(Watch::spawn(subscription, move |event| {
            let service = service.clone();
            let callback = Arc::clone(&callback);
            async move {
                let Some(id) = event.row_id().and_then(serde_json::Value::as_i64) else {
                    tracing::warn!("comment event without id");
                    return;
                };
                match service.by_id(CommentId(id)).await {
                    Ok(comment) => callback(comment),
                    Err(e) => tracing::warn!(comment = id, error = %e, "dropping comment event"),
                }
            }
        }))
    }
}

impl std::fmt::Debug for CommentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{social_schema, POSTS, USER_PROFILES};
    use crate::users::UserPatch;
    use plaza_backend::MemoryBackend;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn fixture() -> (Arc<MemoryBackend>, UserStore, CommentService, UserId) {
        let backend = Arc::new(MemoryBackend::with_schema(social_schema()));
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let users = UserStore::new();
        let comments = CommentService::new(
            dyn_backend.clone(),
            users.clone(),
            ProfileService::new(dyn_backend),
        );
        let author = UserId::random();
        backend
            .seed(
                USER_PROFILES,
                vec![json!({"id": author, "display_name": "Ana"})],
            )
            .unwrap();
        backend
            .seed(POSTS, vec![json!({"content": "p1"}), json!({"content": "p2"})])
            .unwrap();
        (backend, users, comments, author)
    }

    #[tokio::test]
    async fn add_requires_login() {
        let (backend, _, comments, _) = fixture();
        let err = comments.add("hi", PostId(1)).await.unwrap_err();
        assert!(err.is_not_authenticated());
        assert!(backend.rows(COMMENTS).is_empty());
    }

    #[tokio::test]
    async fn add_stores_author_and_returns_embed() {
        let (backend, users, comments, author) = fixture();
        users.update(&UserPatch::new().with_id(Some(author)));

        let comment = comments.add("hi", PostId(1)).await.unwrap();

        assert_eq!(comment.content, "hi");
        assert_eq!(comment.post_id, Some(PostId(1)));
        assert_eq!(comment.author.unwrap().id, author);
        let row = &backend.rows(COMMENTS)[0];
        assert_eq!(row["user_id"], json!(author));
        assert_eq!(row["user_profile_id"], json!(author));
    }

    #[tokio::test]
    async fn listings_are_ordered() {
        let (_, users, comments, author) = fixture();
        users.update(&UserPatch::new().with_id(Some(author)));
        let a = comments.add("a", PostId(1)).await.unwrap();
        let b = comments.add("b", PostId(1)).await.unwrap();
        let c = comments.add("c", PostId(2)).await.unwrap();

        let on_post: Vec<_> = comments.by_post(PostId(1)).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(on_post, vec![a.id, b.id]);

        let by_user: Vec<_> = comments.by_user(author).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(by_user, vec![c.id, b.id, a.id]);

        comments.delete(b.id).await.unwrap();
        assert_eq!(comments.by_post(PostId(1)).await.unwrap().len(), 1);
        assert!(comments.by_id(b.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn watch_post_delivers_refetched_comments_for_that_post() {
        let (_, users, comments, author) = fixture();
        users.update(&UserPatch::new().with_id(Some(author)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watch = comments
            .watch_post(PostId(1), move |comment| {
                let _ = tx.send(comment);
            })
            .await
            .unwrap();
        assert_eq!(watch.channel(), "post-comments-1");

        comments.add("elsewhere", PostId(2)).await.unwrap();
        let added = comments.add("here", PostId(1)).await.unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.id, added.id);
        assert_eq!(seen.author.unwrap().display_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn watch_user_filters_on_author() {
        let (backend, users, comments, author) = fixture();
        users.update(&UserPatch::new().with_id(Some(author)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watch = comments
            .watch_user(author, move |comment| {
                let _ = tx.send(comment.content);
            })
            .await
            .unwrap();

        backend
            .insert(&Insert::into(COMMENTS).row(json!({
                "content": "stranger", "post_id": 1, "user_profile_id": UserId::random()
            })))
            .await
            .unwrap();
        comments.add("mine", PostId(1)).await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("mine"));
    }
}
