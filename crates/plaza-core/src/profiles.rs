//! Extended user profiles (`user_profiles` table, `avatars` bucket)

use chrono::Utc;
use plaza_backend::{Backend, Insert, Query, Update, Upload};
use std::sync::Arc;

use crate::error::{BackendResultExt, PlazaError};
use crate::tables::{first_row, AVATARS_BUCKET, USER_PROFILES};
use crate::types::{decode, NewProfile, ProfileUpdate, UserId, UserProfile};

/// Profile operations
#[derive(Clone)]
pub struct ProfileService {
    backend: Arc<dyn Backend>,
}

impl ProfileService {
    /// Create service over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Insert a profile row
    pub async fn add(&self, profile: &NewProfile) -> Result<(), PlazaError> {
        let row = serde_json::to_value(profile)?;
        self.backend
            .insert(&Insert::into(USER_PROFILES).row(row))
            .await
            .context("create profile")?;
        tracing::info!(user = %profile.id, "profile created");
        Ok(())
    }

    /// Change the given fields of profile `id`
    pub async fn update(&self, id: UserId, update: &ProfileUpdate) -> Result<(), PlazaError> {
        if update.is_empty() {
            return Err(PlazaError::InvalidInput("no profile field to update".into()));
        }
        let values = serde_json::to_value(update)?;
        self.backend
            .update(&Update::table(USER_PROFILES).set_all(values).eq("id", id))
            .await
            .context("update profile")
    }

    /// Fetch profile `id`
    pub async fn by_id(&self, id: UserId) -> Result<UserProfile, PlazaError> {
        let rows = self
            .backend
            .select(&Query::table(USER_PROFILES).select("*").eq("id", id).single())
            .await
            .context("fetch profile")?;
        decode(first_row(rows, USER_PROFILES).context("fetch profile")?)
    }

    /// Upload an avatar for `user_id` and return its public URL
    ///
    /// Objects are stored as `{user_id}_{unix_millis}`.
    pub async fn upload_avatar(&self, user_id: UserId, upload: &Upload) -> Result<String, PlazaError> {
        let path = format!("{user_id}_{}", Utc::now().timestamp_millis());
        self.backend
            .upload(AVATARS_BUCKET, &path, upload)
            .await
            .context("upload avatar")?;
        tracing::debug!(%path, bytes = upload.len(), "avatar uploaded");
        Ok(self.backend.public_url(AVATARS_BUCKET, &path))
    }

    /// Profile ID belonging to auth user `user_id`
    pub(crate) async fn lookup_id(
        &self,
        user_id: UserId,
        operation: &'static str,
    ) -> Result<UserId, PlazaError> {
        let rows = self
            .backend
            .select(&Query::table(USER_PROFILES).select("id").eq("id", user_id).single())
            .await
            .context(operation)?;
        let row = first_row(rows, USER_PROFILES).context(operation)?;
        Ok(serde_json::from_value(row["id"].clone())?)
    }
}

impl std::fmt::Debug for ProfileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService").finish_non_exhaustive()
    }
}
