//! Domain rows and identifiers
//!
//! Rows are owned by the backend; these types hold them transiently. Embedded
//! author profiles arrive under the `user_profiles` key and are exposed as
//! `author`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PlazaError;

/// Auth user / profile identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Wrap a UUID
    #[inline]
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Random ID
    #[inline]
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<UserId> for Value {
    fn from(id: UserId) -> Self {
        Value::String(id.0.to_string())
    }
}

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Value {
            fn from(id: $name) -> Self {
                Value::from(id.0)
            }
        }
    };
}

row_id!(
    /// Post row ID
    PostId
);
row_id!(
    /// Comment row ID
    CommentId
);
row_id!(
    /// Chat message row ID
    MessageId
);

/// Extended profile of a user (`user_profiles` row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Same as the auth user ID
    pub id: UserId,
    /// Public name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Free-form bio
    #[serde(default)]
    pub bio: Option<String>,
    /// Career / field of study
    #[serde(default)]
    pub career: Option<String>,
    /// Public avatar URL
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Author data embedded in posts, comments and messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    /// Profile ID
    pub id: UserId,
    /// Public name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Public avatar URL
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ProfileSummary {
    /// Display name, falling back to the ID
    #[must_use]
    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// A post with its author and comments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Row ID
    pub id: PostId,
    /// Body text
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Public URL of the attached image
    #[serde(default)]
    pub image_url: Option<String>,
    /// Author profile ID
    #[serde(default)]
    pub user_profile_id: Option<UserId>,
    /// Embedded author
    #[serde(rename = "user_profiles", default)]
    pub author: Option<ProfileSummary>,
    /// Embedded comments
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// A comment with its author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Row ID
    pub id: CommentId,
    /// Body text
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Post the comment belongs to (absent when embedded in a post)
    #[serde(default)]
    pub post_id: Option<PostId>,
    /// Author profile ID (present on raw change rows)
    #[serde(default)]
    pub user_profile_id: Option<UserId>,
    /// Embedded author
    #[serde(rename = "user_profiles", default)]
    pub author: Option<ProfileSummary>,
}

/// A global chat message with its author
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Row ID
    pub id: MessageId,
    /// Message text
    pub body: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Sender profile ID
    #[serde(default)]
    pub user_profile_id: Option<UserId>,
    /// Embedded sender
    #[serde(rename = "user_profiles", default)]
    pub author: Option<ProfileSummary>,
}

/// Row inserted when a profile is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    /// Auth user ID
    pub id: UserId,
    /// Public name
    pub display_name: Option<String>,
    /// Free-form bio
    pub bio: Option<String>,
    /// Career / field of study
    pub career: Option<String>,
}

/// Profile fields entered at registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    /// Public name
    pub display_name: Option<String>,
    /// Free-form bio
    pub bio: Option<String>,
    /// Career / field of study
    pub career: Option<String>,
}

impl ProfileDraft {
    /// Empty draft
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// With bio
    #[inline]
    #[must_use]
    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    /// With career
    #[inline]
    #[must_use]
    pub fn with_career(mut self, career: impl Into<String>) -> Self {
        self.career = Some(career.into());
        self
    }

    /// Profile row for `id`
    #[must_use]
    pub fn into_profile(self, id: UserId) -> NewProfile {
        NewProfile {
            id,
            display_name: self.display_name,
            bio: self.bio,
            career: self.career,
        }
    }
}

/// Fields to change on a profile; unset fields are left untouched
///
/// `Some(None)` writes null, clearing the column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::option_option)]
pub struct ProfileUpdate {
    /// New public name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<Option<String>>,
    /// New bio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<Option<String>>,
    /// New career
    #[serde(skip_serializing_if = "Option::is_none")]
    pub career: Option<Option<String>>,
    /// New avatar URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
}

impl ProfileUpdate {
    /// Update that changes nothing
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set display name
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(Some(name.into()));
        self
    }

    /// Set bio
    #[inline]
    #[must_use]
    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(Some(bio.into()));
        self
    }

    /// Clear bio
    #[inline]
    #[must_use]
    pub fn without_bio(mut self) -> Self {
        self.bio = Some(None);
        self
    }

    /// Set career
    #[inline]
    #[must_use]
    pub fn with_career(mut self, career: impl Into<String>) -> Self {
        self.career = Some(Some(career.into()));
        self
    }

    /// Clear career
    #[inline]
    #[must_use]
    pub fn without_career(mut self) -> Self {
        self.career = Some(None);
        self
    }

    /// Set avatar URL
    #[inline]
    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(Some(url.into()));
        self
    }

    /// Whether no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bio.is_none()
            && self.career.is_none()
            && self.avatar_url.is_none()
    }
}

/// Row inserted into the global chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    /// Message text
    pub body: String,
    /// Auth user ID of the sender
    pub user_id: UserId,
    /// Profile ID of the sender
    pub user_profile_id: UserId,
}

/// Decode one row
pub(crate) fn decode<T: DeserializeOwned>(row: Value) -> Result<T, PlazaError> {
    Ok(serde_json::from_value(row)?)
}

/// Decode every row
pub(crate) fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, PlazaError> {
    rows.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn post_decodes_embedded_rows() {
        let author = UserId::random();
        let post: Post = decode(json!({
            "id": 3,
            "content": "hola",
            "created_at": "2024-05-01T10:00:00.123456+00:00",
            "image_url": null,
            "user_profile_id": author.to_string(),
            "user_profiles": {"id": author.to_string(), "display_name": "Ana", "avatar_url": null},
            "comments": [{
                "id": 9,
                "content": "nice",
                "created_at": "2024-05-01T11:00:00Z",
                "user_profiles": null
            }]
        }))
        .unwrap();

        assert_eq!(post.id, PostId(3));
        assert_eq!(post.author.as_ref().map(ProfileSummary::name).as_deref(), Some("Ana"));
        assert_eq!(post.comments.len(), 1);
        assert_eq!(post.comments[0].post_id, None);
        assert!(post.comments[0].author.is_none());
    }

    #[test]
    fn raw_change_row_decodes_without_embeds() {
        let comment: Comment = decode(json!({
            "id": 4,
            "content": "raw",
            "created_at": "2024-05-01T10:00:00Z",
            "post_id": 2,
            "user_id": "1f0e0b63-1d1c-4a8e-9a57-7b2f3c3f2a11",
            "user_profile_id": "1f0e0b63-1d1c-4a8e-9a57-7b2f3c3f2a11"
        }))
        .unwrap();
        assert_eq!(comment.post_id, Some(PostId(2)));
        assert!(comment.user_profile_id.is_some());
    }

    #[test]
    fn ids_render_as_filter_values() {
        assert_eq!(Value::from(PostId(7)), json!(7));
        let user: UserId = "1f0e0b63-1d1c-4a8e-9a57-7b2f3c3f2a11".parse().unwrap();
        assert_eq!(
            Value::from(user),
            json!("1f0e0b63-1d1c-4a8e-9a57-7b2f3c3f2a11")
        );
        assert_eq!("12".parse::<CommentId>().unwrap(), CommentId(12));
    }

    #[test]
    fn profile_update_serializes_only_set_fields() {
        let update = ProfileUpdate::new().with_bio("hi");
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"bio": "hi"}));
        assert!(!update.is_empty());
        assert!(ProfileUpdate::new().is_empty());
    }

    #[test]
    fn draft_becomes_profile_row() {
        let id = UserId::random();
        let row = ProfileDraft::new().with_display_name("Ana").into_profile(id);
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!({"id": id.to_string(), "display_name": "Ana", "bio": null, "career": null})
        );
    }
}
