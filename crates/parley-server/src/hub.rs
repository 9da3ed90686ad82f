//! Hub dispatch: one typed request in, one typed response out.
//!
//! The caller is whoever the connection is bound to in the registry.
//! Anonymous connections may only `Register` or `Login`. Restricted users
//! must act from their primary device for everything except signing out and
//! inspecting their own devices or access status.

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_shared::constants::{
    MAX_USERNAME_LEN, MIN_PASSWORD_LEN, MIN_USERNAME_LEN, UNKNOWN_DEVICE_INFO, UNKNOWN_DEVICE_NAME,
};
use parley_shared::types::{ConnectionId, UserId};
use parley_shared::{
    AccessStatus, HubError, HubEvent, HubRequest, HubResponse, ServerFrame, UserProfile,
};
use parley_store::{NewUser, StoreError, User};

use crate::auth::{Credentials, TokenIssuer};
use crate::chats::ChatResolver;
use crate::devices::{self, DeviceManager};
use crate::error::ServiceError;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::store::ChatStore;

const SEARCH_LIMIT: u32 = 20;

pub struct Hub {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    devices: DeviceManager,
    chats: ChatResolver,
    router: MessageRouter,
    credentials: Credentials,
    tokens: TokenIssuer,
}

impl Hub {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        credentials: Credentials,
        tokens: TokenIssuer,
        max_message_len: usize,
    ) -> Self {
        Self {
            devices: DeviceManager::new(store.clone()),
            chats: ChatResolver::new(store.clone()),
            router: MessageRouter::new(store.clone(), registry.clone(), max_message_len),
            store,
            registry,
            credentials,
            tokens,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Run one request on behalf of `conn`.
    pub async fn handle(&self, conn: ConnectionId, request: HubRequest) -> Result<HubResponse, HubError> {
        let method = request.method();
        let result = match self.caller(conn, &request).await {
            Ok(caller) => self.dispatch(conn, caller, request).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => debug!(conn = %conn, method, "request handled"),
            Err(e) => debug!(conn = %conn, method, kind = ?e.kind(), error = %e, "request failed"),
        }
        result.map_err(HubError::from)
    }

    // ------------------------------------------------------------------
    // Authentication and access
    // ------------------------------------------------------------------

    /// The signed-in user behind `conn`, after the restricted-user gate.
    /// `None` for anonymous operations and unbound connections.
    async fn caller(&self, conn: ConnectionId, request: &HubRequest) -> Result<Option<UserId>, ServiceError> {
        if request.is_anonymous() {
            return Ok(None);
        }
        let Some(user) = self.registry.user_of(conn) else {
            return Ok(None);
        };

        if requires_primary_device(request) {
            self.check_device_access(conn, user).await?;
        }
        Ok(Some(user))
    }

    async fn check_device_access(&self, conn: ConnectionId, user: UserId) -> Result<(), ServiceError> {
        let status = self.access_status(conn, user).await?;
        if !status.is_restricted || status.is_primary_device {
            return Ok(());
        }

        let reason = "This account can only be used from its primary device".to_string();
        warn!(conn = %conn, user = %user, "restricted user on non-primary device");
        self.registry
            .send_to(
                conn,
                ServerFrame::Event(HubEvent::AccessDenied {
                    reason: reason.clone(),
                }),
            )
            .await;
        Err(ServiceError::AccessDenied(reason))
    }

    async fn access_status(&self, conn: ConnectionId, user: UserId) -> Result<AccessStatus, ServiceError> {
        let account = self.user(user).await?;
        let hint = self.registry.device_name_of(conn);
        let is_primary_device = match self.devices.resolve_current(user, hint.as_deref()).await {
            Ok(device) => device.is_primary,
            Err(ServiceError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        Ok(AccessStatus {
            is_restricted: account.is_restricted,
            is_primary_device,
        })
    }

    async fn register(
        &self,
        conn: ConnectionId,
        username: String,
        password: String,
        display_name: String,
        device_name: String,
        device_info: String,
    ) -> Result<HubResponse, ServiceError> {
        let username = username.trim().to_string();
        validate_username(&username)?;
        validate_password(&password)?;

        let display_name = match display_name.trim() {
            "" => username.clone(),
            name => name.to_string(),
        };
        let password_hash = self.credentials.hash_password(password).await?;

        let user = self
            .store
            .create_user(NewUser {
                username,
                password_hash,
                display_name,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ServiceError::Validation("Username is already taken".into()),
                other => ServiceError::from_store("User", other),
            })?;
        info!(user = %user.id, username = %user.username, "user registered");

        self.sign_in(conn, &user, device_name, device_info, true).await
    }

    async fn login(
        &self,
        conn: ConnectionId,
        username: String,
        password: String,
        device_name: String,
        device_info: String,
    ) -> Result<HubResponse, ServiceError> {
        let invalid = || ServiceError::Unauthorized("Invalid username or password".into());

        let user = self
            .store
            .find_user_by_username(username.trim().to_string())
            .await
            .map_err(|e| ServiceError::from_store("User", e))?
            .ok_or_else(invalid)?;

        if !self
            .credentials
            .verify_password(password, user.password_hash.clone())
            .await
        {
            warn!(username = %user.username, "failed login");
            return Err(invalid());
        }
        info!(user = %user.id, "user logged in");

        self.sign_in(conn, &user, device_name, device_info, false).await
    }

    /// Record the device, bind the connection and hand out a token. A device
    /// bookkeeping failure does not fail the sign-in.
    async fn sign_in(
        &self,
        conn: ConnectionId,
        user: &User,
        device_name: String,
        device_info: String,
        is_primary_hint: bool,
    ) -> Result<HubResponse, ServiceError> {
        let device_name = or_default(device_name, UNKNOWN_DEVICE_NAME);
        let device_info = or_default(device_info, UNKNOWN_DEVICE_INFO);

        if let Err(e) = self
            .devices
            .register_or_update(user.id, &device_name, &device_info, is_primary_hint, true)
            .await
        {
            warn!(user = %user.id, error = %e, "device registration failed, continuing sign-in");
        }

        self.registry.bind(conn, user.id);
        self.registry.set_device_name_if_missing(conn, &device_name);

        Ok(HubResponse::Token {
            token: self.tokens.issue(user.id),
            user_id: user.id,
        })
    }

    // ------------------------------------------------------------------
    // Authenticated operations
    // ------------------------------------------------------------------

    async fn dispatch(
        &self,
        conn: ConnectionId,
        caller: Option<UserId>,
        request: HubRequest,
    ) -> Result<HubResponse, ServiceError> {
        match (request, caller) {
            (
                HubRequest::Register {
                    username,
                    password,
                    display_name,
                    device_name,
                    device_info,
                },
                _,
            ) => {
                self.register(conn, username, password, display_name, device_name, device_info)
                    .await
            }

            (
                HubRequest::Login {
                    username,
                    password,
                    device_name,
                    device_info,
                },
                _,
            ) => self.login(conn, username, password, device_name, device_info).await,

            (_, None) => Err(ServiceError::Unauthorized("Not signed in".into())),

            (HubRequest::Logout, Some(user)) => {
                self.registry.unbind(conn, user);
                info!(conn = %conn, user = %user, "logged out");
                Ok(HubResponse::Done)
            }

            (HubRequest::SendMessage { chat_id, content }, Some(user)) => self
                .router
                .send_message(chat_id, user, &content)
                .await
                .map(HubResponse::Message),

            (HubRequest::GetChatMessages { chat_id }, Some(user)) => self
                .router
                .chat_messages(chat_id, user)
                .await
                .map(HubResponse::Messages),

            (HubRequest::GetUserChats, Some(user)) => {
                self.chats.list_for_user(user).await.map(HubResponse::Chats)
            }

            (HubRequest::StartPrivateChat { other_user_id }, Some(user)) => {
                self.start_private_chat(user, other_user_id).await
            }

            (HubRequest::GetUserDevices, Some(user)) => {
                let devices = self.devices.list(user).await?;
                Ok(HubResponse::Devices(
                    devices.into_iter().map(devices::to_view).collect(),
                ))
            }

            (HubRequest::SetPrimaryDevice { device_id }, Some(user)) => {
                let device = self.devices.set_primary(user, device_id).await?;
                Ok(HubResponse::Device(devices::to_view(device)))
            }

            (HubRequest::RemoveDevice { device_id }, Some(user)) => {
                self.devices.remove(user, device_id).await?;
                Ok(HubResponse::Done)
            }

            (HubRequest::GetCurrentDevice, Some(user)) => {
                let hint = self.registry.device_name_of(conn);
                let device = self.devices.resolve_current(user, hint.as_deref()).await?;
                Ok(HubResponse::Device(devices::to_view(device)))
            }

            (HubRequest::SearchUsers { query }, Some(user)) => self.search_users(user, &query).await,

            (
                HubRequest::UpdateProfile {
                    display_name,
                    about,
                },
                Some(user),
            ) => {
                let display_name = display_name.trim().to_string();
                if display_name.is_empty() {
                    return Err(ServiceError::Validation("Display name is required".into()));
                }
                let about = about
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty());
                let updated = self
                    .store
                    .update_user_profile(user, display_name, about)
                    .await
                    .map_err(|e| ServiceError::from_store("User", e))?;
                Ok(HubResponse::Profile(profile(&updated)))
            }

            (HubRequest::SetRestricted { is_restricted }, Some(user)) => {
                self.store
                    .set_user_restricted(user, is_restricted)
                    .await
                    .map_err(|e| ServiceError::from_store("User", e))?;
                info!(user = %user, is_restricted, "restriction changed");
                Ok(HubResponse::Done)
            }

            (HubRequest::GetAccessStatus, Some(user)) => self
                .access_status(conn, user)
                .await
                .map(HubResponse::AccessStatus),
        }
    }

    /// Resolve the chat and tell every connection of both users about it,
    /// each labelled with the other participant's name.
    async fn start_private_chat(&self, user: UserId, other: UserId) -> Result<HubResponse, ServiceError> {
        let chat = self.chats.get_or_create_private_chat(user, other).await?;

        let mine = self.chats.summarize(chat.clone(), user).await?;
        let theirs = self.chats.summarize(chat, other).await?;

        let (to_me, to_them) = tokio::join!(
            self.registry
                .broadcast(user, HubEvent::ChatStarted(mine.clone())),
            self.registry
                .broadcast(other, HubEvent::ChatStarted(theirs)),
        );
        debug!(chat = %mine.id, to_me, to_them, "chat start announced");

        Ok(HubResponse::Chat(mine))
    }

    async fn search_users(&self, user: UserId, query: &str) -> Result<HubResponse, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(HubResponse::Users(Vec::new()));
        }
        let found = self
            .store
            .search_users(query.to_string(), SEARCH_LIMIT + 1)
            .await
            .map_err(|e| ServiceError::from_store("User", e))?;
        Ok(HubResponse::Users(
            found
                .iter()
                .filter(|u| u.id != user)
                .take(SEARCH_LIMIT as usize)
                .map(profile)
                .collect(),
        ))
    }

    async fn user(&self, id: UserId) -> Result<User, ServiceError> {
        self.store
            .get_user(id)
            .await
            .map_err(|e| ServiceError::from_store("User", e))
    }
}

/// Everything a restricted user may still do from a secondary device.
fn requires_primary_device(request: &HubRequest) -> bool {
    !request.is_anonymous()
        && !matches!(
            request,
            HubRequest::Logout
                | HubRequest::GetUserDevices
                | HubRequest::GetCurrentDevice
                | HubRequest::GetAccessStatus
        )
}

fn validate_username(username: &str) -> Result<(), ServiceError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(ServiceError::Validation(format!(
            "Username must be {MIN_USERNAME_LEN} to {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ServiceError::Validation(
            "Username may only contain letters, digits, '_', '-' and '.'".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn or_default(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

fn profile(user: &User) -> UserProfile {
    UserProfile {
        id: user.id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        about: user.about.clone(),
        is_restricted: user.is_restricted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parley_shared::types::ChatId;
    use parley_shared::HubErrorKind;
    use tokio::sync::mpsc;

    use crate::store::SqliteStore;

    fn hub() -> Hub {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(100)));
        Hub::new(
            store,
            registry,
            Credentials::fast(),
            TokenIssuer::new(b"test-secret", 1).unwrap(),
            4096,
        )
    }

    fn connect(hub: &Hub, device: Option<&str>) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(32);
        hub.registry().register(conn, tx, device.map(String::from));
        (conn, rx)
    }

    async fn register(hub: &Hub, conn: ConnectionId, username: &str, device: &str) -> UserId {
        let response = hub
            .handle(
                conn,
                HubRequest::Register {
                    username: username.into(),
                    password: "secret-pw".into(),
                    display_name: String::new(),
                    device_name: device.into(),
                    device_info: "test".into(),
                },
            )
            .await
            .unwrap();
        match response {
            HubResponse::Token { user_id, token } => {
                assert_eq!(hub.tokens().verify(&token).unwrap(), user_id);
                user_id
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    async fn login(hub: &Hub, conn: ConnectionId, username: &str, device: &str) -> Result<HubResponse, HubError> {
        hub.handle(
            conn,
            HubRequest::Login {
                username: username.into(),
                password: "secret-pw".into(),
                device_name: device.into(),
                device_info: "test".into(),
            },
        )
        .await
    }

    fn events(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<HubEvent> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Event(event) = frame {
                out.push(event);
            }
        }
        out
    }

    #[tokio::test]
    async fn anonymous_connections_can_only_sign_in() {
        let hub = hub();
        let (conn, _rx) = connect(&hub, None);

        let err = hub.handle(conn, HubRequest::GetUserChats).await.unwrap_err();
        assert_eq!(err.kind, HubErrorKind::Unauthorized);

        register(&hub, conn, "alice", "Phone").await;
        assert!(hub.handle(conn, HubRequest::GetUserChats).await.is_ok());

        hub.handle(conn, HubRequest::Logout).await.unwrap();
        let err = hub.handle(conn, HubRequest::GetUserChats).await.unwrap_err();
        assert_eq!(err.kind, HubErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn registration_validates_input() {
        let hub = hub();
        let (conn, _rx) = connect(&hub, None);
        register(&hub, conn, "alice", "Phone").await;

        let (other, _rx2) = connect(&hub, None);
        for (username, password) in [
            ("alice", "secret-pw"),
            ("al", "secret-pw"),
            ("bad name", "secret-pw"),
            ("bobby", "short"),
        ] {
            let err = hub
                .handle(
                    other,
                    HubRequest::Register {
                        username: username.into(),
                        password: password.into(),
                        display_name: String::new(),
                        device_name: "Phone".into(),
                        device_info: "test".into(),
                    },
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind, HubErrorKind::Validation, "{username}/{password}");
        }
    }

    #[tokio::test]
    async fn login_checks_password_and_defaults_device_fields() {
        let hub = hub();
        let (first, _rx) = connect(&hub, None);
        let alice = register(&hub, first, "alice", "Phone").await;

        let (second, _rx2) = connect(&hub, None);
        let err = hub
            .handle(
                second,
                HubRequest::Login {
                    username: "alice".into(),
                    password: "wrong-pw".into(),
                    device_name: String::new(),
                    device_info: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HubErrorKind::Unauthorized);
        assert_eq!(err.message, "Invalid username or password");

        let err = login(&hub, second, "nobody", "x").await.unwrap_err();
        assert_eq!(err.kind, HubErrorKind::Unauthorized);

        let response = login(&hub, second, "alice", "").await.unwrap();
        assert!(matches!(response, HubResponse::Token { user_id, .. } if user_id == alice));

        let current = hub.handle(second, HubRequest::GetCurrentDevice).await.unwrap();
        match current {
            HubResponse::Device(device) => {
                assert_eq!(device.device_name, UNKNOWN_DEVICE_NAME);
                assert!(!device.is_primary);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_private_chat_is_listed_for_both_users() {
        let hub = hub();
        let (alice_conn, mut alice_rx) = connect(&hub, Some("Phone"));
        let (bob_conn, mut bob_rx) = connect(&hub, Some("Phone"));
        register(&hub, alice_conn, "alice", "Phone").await;
        let bob = register(&hub, bob_conn, "bob", "Phone").await;

        let chat = match hub
            .handle(alice_conn, HubRequest::StartPrivateChat { other_user_id: bob })
            .await
            .unwrap()
        {
            HubResponse::Chat(chat) => chat,
            other => panic!("unexpected response {other:?}"),
        };
        assert!(!chat.is_group);
        assert_eq!(chat.display_name, "bob");

        for (conn, expected_label) in [(alice_conn, "bob"), (bob_conn, "alice")] {
            match hub.handle(conn, HubRequest::GetUserChats).await.unwrap() {
                HubResponse::Chats(chats) => {
                    assert_eq!(chats.len(), 1);
                    assert_eq!(chats[0].id, chat.id);
                    assert_eq!(chats[0].display_name, expected_label);
                }
                other => panic!("unexpected response {other:?}"),
            }
        }

        let to_alice = events(&mut alice_rx);
        let to_bob = events(&mut bob_rx);
        assert!(matches!(&to_alice[..], [HubEvent::ChatStarted(s)] if s.display_name == "bob"));
        assert!(matches!(&to_bob[..], [HubEvent::ChatStarted(s)] if s.display_name == "alice"));

        // Starting it again from the other side resolves the same chat.
        match hub
            .handle(bob_conn, HubRequest::StartPrivateChat { other_user_id: chat_peer(&hub, alice_conn) })
            .await
            .unwrap()
        {
            HubResponse::Chat(again) => assert_eq!(again.id, chat.id),
            other => panic!("unexpected response {other:?}"),
        }
    }

    fn chat_peer(hub: &Hub, conn: ConnectionId) -> UserId {
        hub.registry().user_of(conn).unwrap()
    }

    #[tokio::test]
    async fn restricted_user_on_secondary_device_is_denied() {
        let hub = hub();
        let (phone, _phone_rx) = connect(&hub, Some("Phone"));
        let alice = register(&hub, phone, "alice", "Phone").await;
        let (bob_conn, _bob_rx) = connect(&hub, Some("Tablet"));
        let bob = register(&hub, bob_conn, "bob", "Tablet").await;

        let chat_id = match hub
            .handle(phone, HubRequest::StartPrivateChat { other_user_id: bob })
            .await
            .unwrap()
        {
            HubResponse::Chat(chat) => chat.id,
            other => panic!("unexpected response {other:?}"),
        };

        let (laptop, mut laptop_rx) = connect(&hub, Some("Laptop"));
        login(&hub, laptop, "alice", "Laptop").await.unwrap();
        hub.handle(phone, HubRequest::SetRestricted { is_restricted: true })
            .await
            .unwrap();

        let send = |conn| {
            hub.handle(
                conn,
                HubRequest::SendMessage {
                    chat_id,
                    content: "hello".into(),
                },
            )
        };

        let err = send(laptop).await.unwrap_err();
        assert_eq!(err.kind, HubErrorKind::AccessDenied);
        assert!(events(&mut laptop_rx)
            .iter()
            .any(|e| matches!(e, HubEvent::AccessDenied { .. })));

        // Device views and status stay reachable from the secondary device.
        assert!(hub.handle(laptop, HubRequest::GetUserDevices).await.is_ok());
        match hub.handle(laptop, HubRequest::GetAccessStatus).await.unwrap() {
            HubResponse::AccessStatus(status) => {
                assert!(status.is_restricted);
                assert!(!status.is_primary_device);
            }
            other => panic!("unexpected response {other:?}"),
        }

        // The primary device is unaffected.
        assert!(send(phone).await.is_ok());
        assert_eq!(hub.registry().user_of(phone), Some(alice));
    }

    #[tokio::test]
    async fn signed_in_connection_can_sign_in_again() {
        let hub = hub();
        let (phone, _phone_rx) = connect(&hub, Some("Phone"));
        let alice = register(&hub, phone, "alice", "Phone").await;
        let (laptop, mut laptop_rx) = connect(&hub, Some("Laptop"));
        login(&hub, laptop, "alice", "Laptop").await.unwrap();
        hub.handle(phone, HubRequest::SetRestricted { is_restricted: true })
            .await
            .unwrap();

        // Signing in skips the primary-device gate, even for a restricted user.
        let response = login(&hub, laptop, "alice", "Laptop").await.unwrap();
        assert!(matches!(response, HubResponse::Token { user_id, .. } if user_id == alice));
        assert!(events(&mut laptop_rx).is_empty());

        let (other, _other_rx) = connect(&hub, None);
        let bob = register(&hub, other, "bob", "Tablet").await;
        hub.handle(other, HubRequest::Logout).await.unwrap();

        login(&hub, phone, "bob", "Phone").await.unwrap();
        assert_eq!(hub.registry().user_of(phone), Some(bob));
        assert!(hub.handle(phone, HubRequest::GetUserChats).await.is_ok());
    }

    #[tokio::test]
    async fn device_management_round_trip() {
        let hub = hub();
        let (phone, _rx) = connect(&hub, Some("Phone"));
        register(&hub, phone, "alice", "Phone").await;
        let (laptop, _rx2) = connect(&hub, Some("Laptop"));
        login(&hub, laptop, "alice", "Laptop").await.unwrap();

        let devices = match hub.handle(phone, HubRequest::GetUserDevices).await.unwrap() {
            HubResponse::Devices(devices) => devices,
            other => panic!("unexpected response {other:?}"),
        };
        assert_eq!(devices.len(), 2);
        assert_eq!(devices.iter().filter(|d| d.is_primary).count(), 1);
        let laptop_device = devices
            .iter()
            .find(|d| d.device_name == "Laptop")
            .map(|d| d.id)
            .unwrap();

        hub.handle(phone, HubRequest::SetPrimaryDevice { device_id: laptop_device })
            .await
            .unwrap();
        match hub.handle(laptop, HubRequest::GetCurrentDevice).await.unwrap() {
            HubResponse::Device(device) => {
                assert_eq!(device.id, laptop_device);
                assert!(device.is_primary);
            }
            other => panic!("unexpected response {other:?}"),
        }

        hub.handle(phone, HubRequest::RemoveDevice { device_id: laptop_device })
            .await
            .unwrap();
        hub.handle(phone, HubRequest::RemoveDevice { device_id: laptop_device })
            .await
            .unwrap();
        match hub.handle(phone, HubRequest::GetUserDevices).await.unwrap() {
            HubResponse::Devices(devices) => assert_eq!(devices.len(), 1),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn messages_and_history_through_the_hub() {
        let hub = hub();
        let (alice_conn, _a) = connect(&hub, Some("Phone"));
        let (bob_conn, mut bob_rx) = connect(&hub, Some("Phone"));
        register(&hub, alice_conn, "alice", "Phone").await;
        let bob = register(&hub, bob_conn, "bob", "Phone").await;

        let chat_id = match hub
            .handle(alice_conn, HubRequest::StartPrivateChat { other_user_id: bob })
            .await
            .unwrap()
        {
            HubResponse::Chat(chat) => chat.id,
            other => panic!("unexpected response {other:?}"),
        };
        events(&mut bob_rx);

        hub.handle(
            alice_conn,
            HubRequest::SendMessage {
                chat_id,
                content: "hi bob".into(),
            },
        )
        .await
        .unwrap();
        let pushed = events(&mut bob_rx);
        assert!(matches!(&pushed[..], [HubEvent::ReceiveMessage(m)] if m.content == "hi bob" && !m.is_current_user));

        match hub
            .handle(bob_conn, HubRequest::GetChatMessages { chat_id })
            .await
            .unwrap()
        {
            HubResponse::Messages(history) => {
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].sender_name.as_deref(), Some("alice"));
                assert!(!history[0].is_current_user);
            }
            other => panic!("unexpected response {other:?}"),
        }

        let err = hub
            .handle(
                alice_conn,
                HubRequest::GetChatMessages {
                    chat_id: ChatId::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HubErrorKind::NotFound);
    }

    #[tokio::test]
    async fn profile_and_search() {
        let hub = hub();
        let (alice_conn, _a) = connect(&hub, None);
        register(&hub, alice_conn, "alice", "Phone").await;
        let (bob_conn, _b) = connect(&hub, None);
        register(&hub, bob_conn, "bob", "Phone").await;

        match hub
            .handle(
                bob_conn,
                HubRequest::UpdateProfile {
                    display_name: " Bobby Tables ".into(),
                    about: Some("  ".into()),
                },
            )
            .await
            .unwrap()
        {
            HubResponse::Profile(profile) => {
                assert_eq!(profile.display_name, "Bobby Tables");
                assert_eq!(profile.about, None);
            }
            other => panic!("unexpected response {other:?}"),
        }

        match hub
            .handle(alice_conn, HubRequest::SearchUsers { query: "b".into() })
            .await
            .unwrap()
        {
            HubResponse::Users(users) => {
                let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
                assert_eq!(names, vec!["bob"]);
            }
            other => panic!("unexpected response {other:?}"),
        }

        let err = hub
            .handle(
                bob_conn,
                HubRequest::UpdateProfile {
                    display_name: "   ".into(),
                    about: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HubErrorKind::Validation);
    }
}
