//! v001 -- Initial schema creation.
//!
//! Creates `users`, `devices`, `chats`, `chat_members`,
//! `private_chat_pairs` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,               -- PHC string
    display_name  TEXT NOT NULL,
    about         TEXT,
    is_restricted INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at    TEXT NOT NULL                -- RFC-3339, fixed width
);

-- ----------------------------------------------------------------
-- Devices
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS devices (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id     TEXT NOT NULL,                 -- FK -> users(id)
    device_name TEXT NOT NULL,
    device_info TEXT NOT NULL,
    is_primary  INTEGER NOT NULL DEFAULT 0,
    is_current  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    last_active TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id);

-- One row per (name, info) fingerprint; later logins refresh it.
CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_fingerprint
    ON devices(user_id, device_name, device_info);

-- At most one primary device per user, enforced by the store itself.
CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_one_primary
    ON devices(user_id) WHERE is_primary = 1;

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    is_group        INTEGER NOT NULL DEFAULT 0,
    group_name      TEXT,
    created_at      TEXT NOT NULL,
    last_message_at TEXT                       -- NULL until the first message
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id TEXT NOT NULL,                     -- FK -> chats(id)
    user_id TEXT NOT NULL,                     -- FK -> users(id)

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

-- One row per unordered pair of users that share a private chat.
-- user_low < user_high, so (a, b) and (b, a) hit the same key.
CREATE TABLE IF NOT EXISTS private_chat_pairs (
    user_low  TEXT NOT NULL,
    user_high TEXT NOT NULL,
    chat_id   TEXT NOT NULL UNIQUE,            -- FK -> chats(id)

    PRIMARY KEY (user_low, user_high),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    chat_id    TEXT NOT NULL,                  -- FK -> chats(id)
    sender_id  TEXT NOT NULL,                  -- FK -> users(id)
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,                  -- assigned at insert time

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
