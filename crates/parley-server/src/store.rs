//! Async facade over the SQLite store.
//!
//! Services only see [`ChatStore`]. [`SqliteStore`] runs every call on the
//! blocking pool so SQLite I/O never stalls a runtime worker.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use parley_shared::types::{ChatId, DeviceId, UserId};
use parley_store::{Chat, Database, Device, Message, NewUser, StoreError, User};

type StoreResult<T> = Result<T, StoreError>;

/// The narrow persistence interface consumed by the hub services.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    // -- users --
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;
    async fn get_user(&self, id: UserId) -> StoreResult<User>;
    async fn find_user_by_username(&self, username: String) -> StoreResult<Option<User>>;
    async fn search_users(&self, query: String, limit: u32) -> StoreResult<Vec<User>>;
    async fn update_user_profile(
        &self,
        id: UserId,
        display_name: String,
        about: Option<String>,
    ) -> StoreResult<User>;
    async fn set_user_restricted(&self, id: UserId, is_restricted: bool) -> StoreResult<()>;

    // -- devices --
    /// Atomic find-or-insert by (name, info) fingerprint. The flag is
    /// `true` when the device was created.
    async fn register_device(
        &self,
        user_id: UserId,
        device_name: String,
        device_info: String,
        is_current: bool,
    ) -> StoreResult<(Device, bool)>;
    async fn clear_current_devices(
        &self,
        user_id: UserId,
        keep: Option<DeviceId>,
    ) -> StoreResult<usize>;
    async fn list_devices(&self, user_id: UserId) -> StoreResult<Vec<Device>>;
    async fn primary_device(&self, user_id: UserId) -> StoreResult<Option<Device>>;
    /// Atomic: exactly one primary device afterwards.
    async fn set_primary_device(&self, user_id: UserId, device_id: DeviceId)
        -> StoreResult<Device>;
    async fn delete_device(&self, user_id: UserId, device_id: DeviceId) -> StoreResult<bool>;

    // -- chats --
    /// Atomic and idempotent for the unordered pair.
    async fn find_or_create_private_chat(&self, a: UserId, b: UserId) -> StoreResult<Chat>;
    async fn get_chat(&self, id: ChatId) -> StoreResult<Chat>;
    async fn list_chats_for_user(&self, user_id: UserId) -> StoreResult<Vec<Chat>>;
    async fn list_chat_members(&self, chat_id: ChatId) -> StoreResult<Vec<UserId>>;

    // -- messages --
    async fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: String,
    ) -> StoreResult<Message>;
    async fn list_messages_for_chat(&self, chat_id: ChatId) -> StoreResult<Vec<Message>>;
}

/// [`ChatStore`] backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| StoreError::Unavailable("database handle poisoned".into()))?;
            op(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store worker failed: {e}")))?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        self.run(move |db| db.create_user(&new)).await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<User> {
        self.run(move |db| db.get_user(id)).await
    }

    async fn find_user_by_username(&self, username: String) -> StoreResult<Option<User>> {
        self.run(move |db| db.find_user_by_username(&username)).await
    }

    async fn search_users(&self, query: String, limit: u32) -> StoreResult<Vec<User>> {
        self.run(move |db| db.search_users(&query, limit)).await
    }

    async fn update_user_profile(
        &self,
        id: UserId,
        display_name: String,
        about: Option<String>,
    ) -> StoreResult<User> {
        self.run(move |db| db.update_user_profile(id, &display_name, about.as_deref()))
            .await
    }

    async fn set_user_restricted(&self, id: UserId, is_restricted: bool) -> StoreResult<()> {
        self.run(move |db| db.set_user_restricted(id, is_restricted)).await
    }

    async fn register_device(
        &self,
        user_id: UserId,
        device_name: String,
        device_info: String,
        is_current: bool,
    ) -> StoreResult<(Device, bool)> {
        self.run(move |db| db.register_device(user_id, &device_name, &device_info, is_current))
            .await
    }

    async fn clear_current_devices(
        &self,
        user_id: UserId,
        keep: Option<DeviceId>,
    ) -> StoreResult<usize> {
        self.run(move |db| db.clear_current_devices(user_id, keep)).await
    }

    async fn list_devices(&self, user_id: UserId) -> StoreResult<Vec<Device>> {
        self.run(move |db| db.list_devices(user_id)).await
    }

    async fn primary_device(&self, user_id: UserId) -> StoreResult<Option<Device>> {
        self.run(move |db| db.primary_device(user_id)).await
    }

    async fn set_primary_device(
        &self,
        user_id: UserId,
        device_id: DeviceId,
    ) -> StoreResult<Device> {
        self.run(move |db| db.set_primary_device(user_id, device_id)).await
    }

    async fn delete_device(&self, user_id: UserId, device_id: DeviceId) -> StoreResult<bool> {
        self.run(move |db| db.delete_device(user_id, device_id)).await
    }

    async fn find_or_create_private_chat(&self, a: UserId, b: UserId) -> StoreResult<Chat> {
        self.run(move |db| db.find_or_create_private_chat(a, b)).await
    }

    async fn get_chat(&self, id: ChatId) -> StoreResult<Chat> {
        self.run(move |db| db.get_chat(id)).await
    }

    async fn list_chats_for_user(&self, user_id: UserId) -> StoreResult<Vec<Chat>> {
        self.run(move |db| db.list_chats_for_user(user_id)).await
    }

    async fn list_chat_members(&self, chat_id: ChatId) -> StoreResult<Vec<UserId>> {
        self.run(move |db| db.list_chat_members(chat_id)).await
    }

    async fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: String,
    ) -> StoreResult<Message> {
        self.run(move |db| db.insert_message(chat_id, sender_id, &content))
            .await
    }

    async fn list_messages_for_chat(&self, chat_id: ChatId) -> StoreResult<Vec<Message>> {
        self.run(move |db| db.list_messages_for_chat(chat_id)).await
    }
}
