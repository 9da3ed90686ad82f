//! Message router: validate, persist, fan out.
//!
//! Sends to the same chat are not serialized here. Two concurrent senders
//! are persisted in whichever order the store commits them and each
//! broadcast follows its own commit, so recipients may see them in either
//! order; history reads always return the store order.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info};

use parley_shared::types::{ChatId, UserId};
use parley_shared::{ChatMessage, HubEvent};
use parley_store::Message;

use crate::error::ServiceError;
use crate::registry::ConnectionRegistry;
use crate::store::ChatStore;

pub struct MessageRouter {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    max_len: usize,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>, max_len: usize) -> Self {
        Self {
            store,
            registry,
            max_len,
        }
    }

    /// Persist a message and push `ReceiveMessage` to every connection of
    /// every member, the sender's other devices included.
    ///
    /// Store failures propagate so the caller can show a failed send.
    /// Delivery failures to individual connections do not.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<ChatMessage, ServiceError> {
        if chat_id.is_nil() {
            return Err(ServiceError::Validation("Chat id is required".into()));
        }
        self.validate_content(content)?;

        let sender = self
            .store
            .get_user(sender_id)
            .await
            .map_err(|e| ServiceError::from_store("Sender", e))?;
        self.store
            .get_chat(chat_id)
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let message = self
            .store
            .insert_message(chat_id, sender_id, content.to_string())
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let members = self
            .store
            .list_chat_members(chat_id)
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let sender_name = sender.label().to_string();
        let deliveries = members.iter().map(|member| {
            let view = annotate(&message, Some(sender_name.clone()), *member);
            self.registry
                .broadcast(*member, HubEvent::ReceiveMessage(view))
        });
        let reached: usize = join_all(deliveries).await.into_iter().sum();

        info!(
            chat = %chat_id,
            message = %message.id,
            sender = %sender_id,
            members = members.len(),
            connections = reached,
            "message routed"
        );

        Ok(annotate(&message, Some(sender_name), sender_id))
    }

    /// The whole history of a chat, oldest first, annotated for
    /// `requester`. Membership is not checked.
    pub async fn chat_messages(
        &self,
        chat_id: ChatId,
        requester: UserId,
    ) -> Result<Vec<ChatMessage>, ServiceError> {
        if chat_id.is_nil() {
            return Err(ServiceError::Validation("Chat id is required".into()));
        }
        self.store
            .get_chat(chat_id)
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let messages = self
            .store
            .list_messages_for_chat(chat_id)
            .await
            .map_err(|e| ServiceError::from_store("Chat", e))?;

        let mut names: HashMap<UserId, Option<String>> = HashMap::new();
        for message in &messages {
            if names.contains_key(&message.sender_id) {
                continue;
            }
            let name = match self.store.get_user(message.sender_id).await {
                Ok(user) => Some(user.label().to_string()),
                Err(e) => {
                    debug!(sender = %message.sender_id, error = %e, "sender name unavailable");
                    None
                }
            };
            names.insert(message.sender_id, name);
        }

        Ok(messages
            .iter()
            .map(|m| {
                let name = names.get(&m.sender_id).cloned().flatten();
                annotate(m, name, requester)
            })
            .collect())
    }

    fn validate_content(&self, content: &str) -> Result<(), ServiceError> {
        if content.trim().is_empty() {
            return Err(ServiceError::Validation("Message content is empty".into()));
        }
        if content.chars().count() > self.max_len {
            return Err(ServiceError::Validation(format!(
                "Message exceeds {} characters",
                self.max_len
            )));
        }
        Ok(())
    }
}

/// The message as seen by `viewer`.
fn annotate(message: &Message, sender_name: Option<String>, viewer: UserId) -> ChatMessage {
    ChatMessage {
        id: message.id,
        chat_id: message.chat_id,
        sender_id: message.sender_id,
        sender_name,
        content: message.content.clone(),
        created_at: message.created_at,
        is_current_user: message.sender_id == viewer,
    }
}
