//! Private chat resolution and chat listings.

use std::sync::Arc;

use tracing::debug;

use parley_shared::types::UserId;
use parley_shared::ChatSummary;
use parley_store::Chat;

use crate::error::ServiceError;
use crate::store::ChatStore;

pub struct ChatResolver {
    store: Arc<dyn ChatStore>,
}

impl ChatResolver {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// The one private chat between `a` and `b`, created on first use.
    /// Symmetric in its arguments and safe to call concurrently: the store
    /// resolves the race, so every caller gets the same chat.
    pub async fn get_or_create_private_chat(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Chat, ServiceError> {
        if a.is_nil() || b.is_nil() {
            return Err(ServiceError::Validation("User id is required".into()));
        }
        if a == b {
            return Err(ServiceError::Validation(
                "Cannot start a private chat with yourself".into(),
            ));
        }

        let chat = self
            .store
            .find_or_create_private_chat(a, b)
            .await
            .map_err(|e| ServiceError::from_store("User", e))?;
        debug!(chat = %chat.id, %a, %b, "private chat resolved");
        Ok(chat)
    }

    /// Chats of `user`, most recently active first, each labelled from
    /// `user`'s point of view.
    pub async fn list_for_user(&self, user: UserId) -> Result<Vec<ChatSummary>, ServiceError> {
        let chats = self
            .store
            .list_chats_for_user(user)
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            summaries.push(self.summarize(chat, user).await?);
        }
        Ok(summaries)
    }

    /// Group name for groups; the other participant's name for private
    /// chats.
    pub async fn summarize(&self, chat: Chat, viewer: UserId) -> Result<ChatSummary, ServiceError> {
        let display_name = match (&chat.group_name, chat.is_group) {
            (Some(name), true) => name.clone(),
            _ => self.other_participant_label(&chat, viewer).await?,
        };

        Ok(ChatSummary {
            id: chat.id,
            is_group: chat.is_group,
            group_name: chat.group_name,
            display_name,
            created_at: chat.created_at,
            last_message_at: chat.last_message_at,
        })
    }

    async fn other_participant_label(
        &self,
        chat: &Chat,
        viewer: UserId,
    ) -> Result<String, ServiceError> {
        let members = self
            .store
            .list_chat_members(chat.id)
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let Some(other) = members.into_iter().find(|m| *m != viewer) else {
            return Ok(String::from("Unknown"));
        };

        let user = self
            .store
            .get_user(other)
            .await
            .map_err(|e| ServiceError::from_store("User", e))?;
        Ok(user.label().to_string())
    }
}
