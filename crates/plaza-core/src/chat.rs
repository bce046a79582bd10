//! Global chat

use plaza_backend::{Backend, ChangeFilter, Direction, Insert, Query};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{BackendResultExt, PlazaError};
use crate::profiles::ProfileService;
use crate::tables::{first_row, GLOBAL_CHAT, MESSAGE_SELECT};
use crate::types::{decode, decode_all, ChatMessage, MessageId, NewChatMessage, UserId};
use crate::users::UserStore;
use crate::watch::Watch;

/// Default number of messages returned by [`ChatService::last_messages`]
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Chat operations
#[derive(Clone)]
pub struct ChatService {
    backend: Arc<dyn Backend>,
    users: UserStore,
    profiles: ProfileService,
    history_limit: usize,
}

impl ChatService {
    /// Create service with the default history limit
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, users: UserStore, profiles: ProfileService) -> Self {
        Self {
            backend,
            users,
            profiles,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// With history limit
    #[inline]
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Most recent messages, newest first
    pub async fn last_messages(&self) -> Result<Vec<ChatMessage>, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(GLOBAL_CHAT)
                    .select(MESSAGE_SELECT)
                    .order("created_at", Direction::Descending)
                    .limit(self.history_limit),
            )
            .await
            .context("fetch chat messages")?;
        decode_all(rows)
    }

    /// One message with its sender
    pub async fn by_id(&self, id: MessageId) -> Result<ChatMessage, PlazaError> {
        let rows = self
            .backend
            .select(
                &Query::table(GLOBAL_CHAT)
                    .select(MESSAGE_SELECT)
                    .eq("id", id)
                    .single(),
            )
            .await
            .context("fetch chat message")?;
        decode(first_row(rows, GLOBAL_CHAT).context("fetch chat message")?)
    }

    /// Insert a message row
    pub async fn save(&self, message: &NewChatMessage) -> Result<(), PlazaError> {
        let row = serde_json::to_value(message)?;
        self.backend
            .insert(&Insert::into(GLOBAL_CHAT).row(row))
            .await
            .context("save chat message")?;
        tracing::debug!(sender = %message.user_id, "chat message saved");
        Ok(())
    }

    /// Send `body` as `user_id`, resolving the sender's profile first
    pub async fn send(&self, body: &str, user_id: UserId) -> Result<(), PlazaError> {
        if body.trim().is_empty() {
            return Err(PlazaError::InvalidInput("message is empty".into()));
        }
        let profile_id = match self.profiles.lookup_id(user_id, "look up chat sender").await {
            Ok(id) => id,
            Err(e) if e.is_not_found() => return Err(PlazaError::ProfileNotFound(user_id)),
            Err(e) => return Err(e),
        };
        self.save(&NewChatMessage {
            body: body.to_string(),
            user_id,
            user_profile_id: profile_id,
        })
        .await
    }

    /// Send `body` as the signed-in user
    pub async fn send_as_current(&self, body: &str) -> Result<(), PlazaError> {
        let user_id = self.users.user_id().ok_or(PlazaError::NotAuthenticated)?;
        self.send(body, user_id).await
    }

    /// New messages, re-fetched with their sender
    pub async fn watch_new_messages<F>(&self, callback: F) -> Result<Watch, PlazaError>
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
    {
        let subscription = self
            .backend
            .subscribe("global-chat", &[ChangeFilter::inserts(GLOBAL_CHAT)])
            .await
            .context("watch chat")?;
        let service = self.clone();
        let callback = Arc::new(callback);
        Ok(Watch::spawn(subscription, move |event| {
            let service = service.clone();
            let callback = Arc::clone(&callback);
            async move {
                let Some(id) = event.row_id().and_then(Value::as_i64) else {
                    tracing::warn!("chat event without id");
                    return;
                };
                tracing::debug!(message = id, "new chat message");
                match service.by_id(MessageId(id)).await {
                    Ok(message) => callback(message),
                    Err(e) => tracing::warn!(message = id, error = %e, "dropping chat event"),
                }
            }
        }))
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{social_schema, USER_PROFILES};
    use crate::users::UserPatch;
    use plaza_backend::MemoryBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fixture() -> (Arc<MemoryBackend>, UserStore, ChatService, UserId) {
        let backend = Arc::new(MemoryBackend::with_schema(social_schema()));
        let dyn_backend: Arc<dyn Backend> = backend.clone();
        let users = UserStore::new();
        let chat = ChatService::new(
            dyn_backend.clone(),
            users.clone(),
            ProfileService::new(dyn_backend),
        );
        let sender = UserId::random();
        backend
            .seed(
                USER_PROFILES,
                vec![json!({"id": sender, "display_name": "Ana"})],
            )
            .unwrap();
        (backend, users, chat, sender)
    }

    #[tokio::test]
    async fn last_messages_is_newest_first_and_limited() {
        let (_, _, chat, sender) = fixture();
        for i in 0..12 {
            chat.send(&format!("m{i}"), sender).await.unwrap();
        }

        let messages = chat.last_messages().await.unwrap();
        assert_eq!(messages.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(messages[0].body, "m11");
        assert_eq!(messages[9].body, "m2");
        assert_eq!(
            messages[0].author.as_ref().and_then(|a| a.display_name.as_deref()),
            Some("Ana")
        );

        let short = chat.clone().with_history_limit(3);
        assert_eq!(short.last_messages().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn send_without_profile_is_profile_not_found() {
        let (backend, _, chat, _) = fixture();
        let stranger = UserId::random();
        assert!(matches!(
            chat.send("hola", stranger).await,
            Err(PlazaError::ProfileNotFound(id)) if id == stranger
        ));
        assert!(backend.rows(GLOBAL_CHAT).is_empty());
    }

    #[tokio::test]
    async fn send_stores_sender_ids() {
        let (backend, _, chat, sender) = fixture();
        chat.send("hola", sender).await.unwrap();
        let row = &backend.rows(GLOBAL_CHAT)[0];
        assert_eq!(row["body"], "hola");
        assert_eq!(row["user_id"], json!(sender));
        assert_eq!(row["user_profile_id"], json!(sender));
        assert!(matches!(chat.send("  ", sender).await, Err(PlazaError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn send_as_current_requires_login() {
        let (_, users, chat, sender) = fixture();
        assert!(chat.send_as_current("hi").await.unwrap_err().is_not_authenticated());
        users.update(&UserPatch::new().with_id(Some(sender)));
        chat.send_as_current("hi").await.unwrap();
    }

    #[tokio::test]
    async fn watch_delivers_messages_with_sender() {
        let (_, _, chat, sender) = fixture();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watch = chat
            .watch_new_messages(move |message| {
                let _ = tx.send(message);
            })
            .await
            .unwrap();

        chat.send("live", sender).await.unwrap();
        let message = rx.recv().await.unwrap();
        assert_eq!(message.body, "live");
        assert_eq!(message.author.unwrap().id, sender);

        watch.stop().await;
    }
}
