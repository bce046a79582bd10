//! Posts, post images and the live feed
//!
//! Images live in the `post.imgs` bucket under `{user_id}/{unix_millis}_{file_name}`.
//! A post's `image_url` is the object's public URL; replacing or removing the
//! image deletes the previous object after the row has been updated.

use chrono::Utc;
use plaza_backend::storage::path_from_public_url;
use plaza_backend::{Backend, ChangeFilter, Delete, Direction, Insert, Query, Update, Upload};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{BackendResultExt, PlazaError};
use crate::profiles::ProfileService;
use crate::tables::{
    first_row, COMMENTS, POSTS, POST_BY_USER_SELECT, POST_IMAGES_BUCKET, POST_SELECT,
};
use crate::types::{decode, decode_all, Comment, Post, PostId, UserId};
use crate::users::UserStore;
use crate::watch::{decode_record, Watch};

/// Post operations
#[derive(Clone)]
pub struct PostService {
    backend: Arc<dyn Backend>,
    users: UserStore,
    profiles: ProfileService,
}

impl PostService {
    /// Create service
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, users: UserStore, profiles: ProfileService) -> Self {
        Self {
            backend,
            users,
            profiles,
        }
    }

    /// Every post, newest first; comments within a post oldest first
    pub async fn all(&self) -> Result<Vec<Post>, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(POSTS)
                    .select(POST_SELECT)
                    .order("created_at", Direction::Descending),
            )
            .await
            .context("fetch posts")?;
        Ok(sort_comments(decode_all(rows)?))
    }

    /// Posts by one author, newest first
    pub async fn by_user(&self, profile_id: UserId) -> Result<Vec<Post>, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(POSTS)
                    .select(POST_BY_USER_SELECT)
                    .eq("user_profile_id", profile_id)
                    .order("created_at", Direction::Descending),
            )
            .await
            .context("fetch user posts")?;
        Ok(sort_comments(decode_all(rows)?))
    }

    /// Publish a post as the signed-in user
    pub async fn create(&self, content: &str, image_url: Option<String>) -> Result<Post, PlazaError> {
        let user_id = self.require_user()?;
        let profile_id = self.profiles.lookup_id(user_id, "look up post author").await?;

        let rows = self
            .backend
            .insert(
                &Insert::into(POSTS)
                    .row(json!({
                        "content": content,
                        "user_profile_id": profile_id,
                        "image_url": image_url,
                    }))
                    .returning(POST_SELECT),
            )
            .await
            .context("create post")?;
        let post: Post = decode(first_row(rows, POSTS).context("create post")?)?;
        tracing::info!(post = %post.id, "post created");
        Ok(post)
    }

    /// Upload an image for a post and return its public URL
    pub async fn upload_image(&self, upload: &Upload) -> Result<String, PlazaError> {
        let user_id = self.require_user()?;
        let path = format!(
            "{user_id}/{}_{}",
            Utc::now().timestamp_millis(),
            upload.file_name
        );
        self.backend
            .upload(POST_IMAGES_BUCKET, &path, upload)
            .await
            .context("upload post image")?;
        tracing::debug!(%path, bytes = upload.len(), "post image uploaded");
        Ok(self.backend.public_url(POST_IMAGES_BUCKET, &path))
    }

    /// Replace a post's text
    pub async fn update_content(&self, post_id: PostId, content: &str) -> Result<(), PlazaError> {
        self.backend
            .update(&Update::table(POSTS).set("content", content).eq("id", post_id))
            .await
            .context("update post")
    }

    /// Replace a post's text and optionally its image
    ///
    /// With `new_image` the image is replaced; otherwise `remove_image`
    /// clears it. The previous object is deleted afterwards; failing to do so
    /// is only logged. Returns the new image URL, if one was uploaded.
    pub async fn update_with_image(
        &self,
        post_id: PostId,
        content: &str,
        new_image: Option<&Upload>,
        remove_image: bool,
    ) -> Result<Option<String>, PlazaError> {
        self.require_user()?;
        let previous = self.image_url(post_id).await?;

        let new_url = match new_image {
            Some(upload) => Some(self.upload_image(upload).await?),
            None => None,
        };

        let mut update = Update::table(POSTS).set("content", content).eq("id", post_id);
        if let Some(url) = &new_url {
            update = update.set("image_url", url.as_str());
        } else if remove_image {
            update = update.set("image_url", Value::Null);
        }
        self.backend.update(&update).await.context("update post")?;

        if new_image.is_some() || remove_image {
            if let Some(previous) = previous {
                self.remove_image(&previous).await;
            }
        }
        Ok(new_url)
    }

    /// Delete a post and its stored image
    pub async fn delete(&self, post_id: PostId) -> Result<(), PlazaError> {
        let image_url = self.image_url(post_id).await?;
        self.backend
            .delete(&Delete::from_table(POSTS).eq("id", post_id))
            .await
            .context("delete post")?;
        if let Some(url) = image_url {
            self.remove_image(&url).await;
        }
        tracing::info!(post = %post_id, "post deleted");
        Ok(())
    }

    /// Object path of a `post.imgs` public URL
    #[must_use]
    pub fn storage_path_from_url(url: &str) -> Option<String> {
        path_from_public_url(url, POST_IMAGES_BUCKET)
    }

    /// Call `callback` with every newly inserted post row
    pub async fn watch_new_posts<F>(&self, callback: F) -> Result<Watch, PlazaError>
    where
        F: Fn(Post) + Send + Sync + 'static,
    {
        let subscription = self
            .backend
            .subscribe("realtime-posts", &[ChangeFilter::inserts(POSTS)])
            .await
            .context("watch posts")?;
        Ok(Watch::spawn(subscription, move |event| {
            if let Some(post) = decode_record(&event) {
                callback(post);
            }
            std::future::ready(())
        }))
    }

    /// Call `callback` with every newly inserted comment row
    pub async fn watch_new_comments<F>(&self, callback: F) -> Result<Watch, PlazaError>
    where
        F: Fn(Comment) + Send + Sync + 'static,
    {
        let subscription = self
            .backend
            .subscribe("realtime-comments", &[ChangeFilter::inserts(COMMENTS)])
            .await
            .context("watch comments")?;
        Ok(Watch::spawn(subscription, move |event| {
            if let Some(comment) = decode_record(&event) {
                callback(comment);
            }
            std::future::ready(())
        }))
    }

    /// Re-fetch the whole feed on any post or comment change
    pub async fn watch_feed<F>(&self, callback: F) -> Result<Watch, PlazaError>
    where
        F: Fn(Vec<Post>) + Send + Sync + 'static,
    {
        let subscription = self
            .backend
            .subscribe(
                "realtime-posts-comments",
                &[ChangeFilter::all(POSTS), ChangeFilter::all(COMMENTS)],
            )
            .await
            .context("watch feed")?;
        let service = self.clone();
        let callback = Arc::new(callback);
        Ok(Watch::spawn(subscription, move |event| {
            let service = service.clone();
            let callback = Arc::clone(&callback);
            async move {
                tracing::debug!(table = %event.table, kind = ?event.kind, "feed changed");
                match service.all().await {
                    Ok(posts) => callback(posts),
                    Err(e) => tracing::warn!(error = %e, "feed refresh failed"),
                }
            }
        }))
    }

    fn require_user(&self) -> Result<UserId, PlazaError> {
        self.users.user_id().ok_or(PlazaError::NotAuthenticated)
    }

    async fn image_url(&self, post_id: PostId) -> Result<Option<String>, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(POSTS)
                    .select("image_url")
                    .eq("id", post_id)
                    .single(),
            )
            .await
            .context("fetch post")?;
        let row = first_row(rows, POSTS).context("fetch post")?;
        Ok(row
            .get("image_url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string))
    }

    async fn remove_image(&self, url: &str) {
        let Some(path) = Self::storage_path_from_url(url) else {
            tracing::warn!(%url, "cannot derive storage path of previous image");
            return;
        };
        match self.backend.remove(POST_IMAGES_BUCKET, &[path.clone()]).await {
            Ok(()) => tracing::debug!(%path, "previous image removed"),
            Err(e) => tracing::warn!(%path, error = %e, "could not remove previous image"),
        }
    }
}

impl std::fmt::Debug for PostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostService").finish_non_exhaustive()
    }
}

fn sort_comments(mut posts: Vec<Post>) -> Vec<Post> {
    for post in &mut posts {
        post.comments.sort_by_key(|comment| comment.created_at);
    }
    posts
}
