//! Table, bucket and select-list constants

use plaza_backend::{BackendError, Schema};
use serde_json::Value;

/// Posts table
pub const POSTS: &str = "posts";
/// Comments table
pub const COMMENTS: &str = "comments";
/// Extended user profiles table
pub const USER_PROFILES: &str = "user_profiles";
/// Global chat table
pub const GLOBAL_CHAT: &str = "global_chat";

/// Bucket holding post images
pub const POST_IMAGES_BUCKET: &str = "post.imgs";
/// Bucket holding avatars
pub const AVATARS_BUCKET: &str = "avatars";

/// Post with author and comments (each with author)
pub(crate) const POST_SELECT: &str = "
    id,
    content,
    created_at,
    image_url,
    user_profile_id,
    user_profiles (
      id,
      display_name,
      avatar_url
    ),
    comments (
      id,
      content,
      created_at,
      user_profiles (
        id,
        display_name,
        avatar_url
      )
    )
";

/// Every post column plus the same embeds as [`POST_SELECT`]
pub(crate) const POST_BY_USER_SELECT: &str = "
    *,
    user_profiles (
      id,
      display_name,
      avatar_url
    ),
    comments (
      id,
      content,
      created_at,
      user_profiles (
        id,
        display_name,
        avatar_url
      )
    )
";

pub(crate) const COMMENT_SELECT: &str = "
    id,
    content,
    created_at,
    post_id,
    user_profiles (
      id,
      display_name,
      avatar_url
    )
";

pub(crate) const MESSAGE_SELECT: &str = "
    id,
    body,
    created_at,
    user_profile_id,
    user_profiles (
      id,
      display_name,
      avatar_url
    )
";

/// Foreign keys between the app's tables, for the in-memory backend
#[must_use]
pub fn social_schema() -> Schema {
    Schema::new()
        .foreign_key(POSTS, "user_profile_id", USER_PROFILES)
        .foreign_key(COMMENTS, "post_id", POSTS)
        .foreign_key(COMMENTS, "user_profile_id", USER_PROFILES)
        .foreign_key(GLOBAL_CHAT, "user_profile_id", USER_PROFILES)
}

/// First row of a single-row result
pub(crate) fn first_row(rows: Vec<Value>, table: &str) -> Result<Value, BackendError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| BackendError::not_found(table))
}
