//! # parley-store
//!
//! Persistent storage for the Parley hub, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. The two operations whose invariants carry weight, private chat
//! creation and the primary-device switch, each run as a single transaction.

pub mod chats;
pub mod database;
pub mod devices;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
