//! Chats and memberships, including the atomic private-chat find-or-create.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use parley_shared::types::{ChatId, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{now, opt_ts_col, ts_col, ts_to_sql, uuid_col, Chat};

const CHAT_COLUMNS: &str = "c.id, c.is_group, c.group_name, c.created_at, c.last_message_at";

/// Order the pair so `(a, b)` and `(b, a)` map to the same key.
fn pair_key(a: UserId, b: UserId) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Private chats
    // ------------------------------------------------------------------

    /// Return the private chat between `a` and `b`, creating it (chat row,
    /// pair row, two memberships) if it does not exist yet.
    ///
    /// The whole read-check-create runs in one IMMEDIATE transaction. The
    /// `private_chat_pairs` primary key backs it up: if the insert still hits
    /// that constraint, the pair was created concurrently and is reread.
    pub fn find_or_create_private_chat(&mut self, a: UserId, b: UserId) -> Result<Chat> {
        if a == b {
            return Err(StoreError::Conflict(
                "a private chat needs two distinct users".into(),
            ));
        }

        match self.create_private_chat_tx(a, b) {
            Ok(chat) => Ok(chat),
            Err(e) if e.is_constraint_violation() => {
                tracing::debug!(%a, %b, "private chat created concurrently, rereading");
                self.find_private_chat(a, b)?.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    fn create_private_chat_tx(&mut self, a: UserId, b: UserId) -> Result<Chat> {
        let (low, high) = pair_key(a, b);
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(chat) = private_chat_in(&tx, &low, &high)? {
            return Ok(chat);
        }

        for user in [a, b] {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user.to_string()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound);
            }
        }

        let chat = Chat {
            id: ChatId::new(),
            is_group: false,
            group_name: None,
            created_at: now(),
            last_message_at: None,
        };

        tx.execute(
            "INSERT INTO chats (id, is_group, group_name, created_at, last_message_at)
             VALUES (?1, 0, NULL, ?2, NULL)",
            params![chat.id.to_string(), ts_to_sql(&chat.created_at)],
        )?;
        tx.execute(
            "INSERT INTO private_chat_pairs (user_low, user_high, chat_id) VALUES (?1, ?2, ?3)",
            params![low, high, chat.id.to_string()],
        )?;
        for user in [a, b] {
            tx.execute(
                "INSERT INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                params![chat.id.to_string(), user.to_string()],
            )?;
        }
        tx.commit()?;

        tracing::info!(chat = %chat.id, %a, %b, "private chat created");
        Ok(chat)
    }

    /// The existing private chat between `a` and `b`, if any.
    pub fn find_private_chat(&self, a: UserId, b: UserId) -> Result<Option<Chat>> {
        let (low, high) = pair_key(a, b);
        private_chat_in(self.conn(), &low, &high)
    }

    // ------------------------------------------------------------------
    // Group chats
    // ------------------------------------------------------------------

    /// Create a group chat with the given members.
    pub fn create_group_chat(&mut self, name: &str, members: &[UserId]) -> Result<Chat> {
        let chat = Chat {
            id: ChatId::new(),
            is_group: true,
            group_name: Some(name.to_string()),
            created_at: now(),
            last_message_at: None,
        };

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (id, is_group, group_name, created_at, last_message_at)
             VALUES (?1, 1, ?2, ?3, NULL)",
            params![chat.id.to_string(), name, ts_to_sql(&chat.created_at)],
        )?;
        for user in members {
            tx.execute(
                "INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)",
                params![chat.id.to_string(), user.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(chat)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(not_found)
    }

    /// Chats the user belongs to, most recently active first. Chats without
    /// messages sort after those with messages, newest first.
    pub fn list_chats_for_user(&self, user_id: UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c
             JOIN chat_members m ON m.chat_id = c.id
             WHERE m.user_id = ?1
             ORDER BY c.last_message_at IS NULL, c.last_message_at DESC, c.created_at DESC, c.rowid DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    pub fn list_chat_members(&self, chat_id: ChatId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM chat_members WHERE chat_id = ?1 ORDER BY user_id")?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            Ok(UserId(uuid_col(row, 0)?))
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

fn private_chat_in(conn: &Connection, low: &str, high: &str) -> Result<Option<Chat>> {
    let chat = conn
        .query_row(
            &format!(
                "SELECT {CHAT_COLUMNS} FROM private_chat_pairs p
                 JOIN chats c ON c.id = p.chat_id
                 WHERE p.user_low = ?1 AND p.user_high = ?2"
            ),
            params![low, high],
            row_to_chat,
        )
        .optional()?;
    Ok(chat)
}

pub(crate) fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: ChatId(uuid_col(row, 0)?),
        is_group: row.get(1)?,
        group_name: row.get(2)?,
        created_at: ts_col(row, 3)?,
        last_message_at: opt_ts_col(row, 4)?,
    })
}
