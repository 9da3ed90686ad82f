use rusqlite::{params, TransactionBehavior};

use parley_shared::types::{ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{now, ts_col, ts_to_sql, uuid_col, Message};

impl Database {
    /// Persist a message with a store-assigned timestamp and advance the
    /// chat's `last_message_at`, in one transaction.
    ///
    /// `last_message_at` only moves forward: a message stamped earlier than
    /// the current value (a concurrent writer committed first) leaves it as
    /// is. Fails with [`StoreError::NotFound`] if the chat or sender is
    /// unknown.
    pub fn insert_message(
        &mut self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (chat_exists, sender_exists): (bool, bool) = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1),
                    EXISTS(SELECT 1 FROM users WHERE id = ?2)",
            params![chat_id.to_string(), sender_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if !chat_exists || !sender_exists {
            return Err(StoreError::NotFound);
        }

        let message = Message {
            id: MessageId::new(),
            chat_id,
            sender_id,
            content: content.to_string(),
            created_at: now(),
        };
        let ts = ts_to_sql(&message.created_at);

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                chat_id.to_string(),
                sender_id.to_string(),
                message.content,
                ts,
            ],
        )?;
        tx.execute(
            "UPDATE chats SET last_message_at = ?2
             WHERE id = ?1 AND (last_message_at IS NULL OR last_message_at < ?2)",
            params![chat_id.to_string(), ts],
        )?;
        tx.commit()?;

        Ok(message)
    }

    /// Every message of a chat in ascending creation order. Messages sharing
    /// a timestamp keep insertion order.
    pub fn list_messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, content, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(uuid_col(row, 0)?),
        chat_id: ChatId(uuid_col(row, 1)?),
        sender_id: UserId(uuid_col(row, 2)?),
        content: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}
