use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::types::{ChatId, DeviceId, MessageId, UserId};

/// Every operation a client can invoke on the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", content = "params")]
pub enum HubRequest {
    /// Create an account and its primary device. Anonymous.
    Register {
        username: String,
        password: String,
        display_name: String,
        device_name: String,
        device_info: String,
    },

    /// Authenticate and register/refresh the calling device. Anonymous.
    Login {
        username: String,
        password: String,
        device_name: String,
        device_info: String,
    },

    /// Remove the calling connection from its user group.
    Logout,

    SendMessage { chat_id: ChatId, content: String },

    GetChatMessages { chat_id: ChatId },

    GetUserChats,

    StartPrivateChat { other_user_id: UserId },

    GetUserDevices,

    SetPrimaryDevice { device_id: DeviceId },

    RemoveDevice { device_id: DeviceId },

    GetCurrentDevice,

    SearchUsers { query: String },

    UpdateProfile {
        display_name: String,
        about: Option<String>,
    },

    SetRestricted { is_restricted: bool },

    GetAccessStatus,
}

impl HubRequest {
    /// Wire name of the operation, used in logs.
    pub fn method(&self) -> &'static str {
        match self {
            HubRequest::Register { .. } => "Register",
            HubRequest::Login { .. } => "Login",
            HubRequest::Logout => "Logout",
            HubRequest::SendMessage { .. } => "SendMessage",
            HubRequest::GetChatMessages { .. } => "GetChatMessages",
            HubRequest::GetUserChats => "GetUserChats",
            HubRequest::StartPrivateChat { .. } => "StartPrivateChat",
            HubRequest::GetUserDevices => "GetUserDevices",
            HubRequest::SetPrimaryDevice { .. } => "SetPrimaryDevice",
            HubRequest::RemoveDevice { .. } => "RemoveDevice",
            HubRequest::GetCurrentDevice => "GetCurrentDevice",
            HubRequest::SearchUsers { .. } => "SearchUsers",
            HubRequest::UpdateProfile { .. } => "UpdateProfile",
            HubRequest::SetRestricted { .. } => "SetRestricted",
            HubRequest::GetAccessStatus => "GetAccessStatus",
        }
    }

    /// Operations that an unauthenticated connection may call.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, HubRequest::Register { .. } | HubRequest::Login { .. })
    }
}

/// Successful results of hub operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum HubResponse {
    Token { token: String, user_id: UserId },
    Done,
    Message(ChatMessage),
    Messages(Vec<ChatMessage>),
    Chat(ChatSummary),
    Chats(Vec<ChatSummary>),
    Device(DeviceView),
    Devices(Vec<DeviceView>),
    Profile(UserProfile),
    Users(Vec<UserProfile>),
    AccessStatus(AccessStatus),
}

/// Server-pushed events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum HubEvent {
    ReceiveMessage(ChatMessage),
    ChatStarted(ChatSummary),
    AccessDenied { reason: String },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::ReceiveMessage(_) => "ReceiveMessage",
            HubEvent::ChatStarted(_) => "ChatStarted",
            HubEvent::AccessDenied { .. } => "AccessDenied",
        }
    }
}

/// Client -> server frame. `id` correlates the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientFrame {
    pub id: u64,
    pub request: HubRequest,
}

/// Server -> client frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "body")]
pub enum ServerFrame {
    Response {
        id: u64,
        result: Result<HubResponse, HubError>,
    },
    Event(HubEvent),
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// Wire views
// ---------------------------------------------------------------------------

/// A chat message as seen by one particular recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Computed per recipient, never stored.
    pub is_current_user: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: ChatId,
    pub is_group: bool,
    pub group_name: Option<String>,
    /// Group name for groups, the other participant's name for private chats.
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceView {
    pub id: DeviceId,
    pub user_id: UserId,
    pub device_name: String,
    pub device_info: String,
    pub is_primary: bool,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub about: Option<String>,
    pub is_restricted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessStatus {
    pub is_restricted: bool,
    pub is_primary_device: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubErrorKind;

    #[test]
    fn request_wire_shape() {
        let frame = ClientFrame {
            id: 7,
            request: HubRequest::SendMessage {
                chat_id: ChatId::new(),
                content: "hi".into(),
            },
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["request"]["method"], "SendMessage");
        assert_eq!(value["request"]["params"]["content"], "hi");
    }

    #[test]
    fn unit_requests_need_no_params() {
        let frame = ClientFrame::from_json(r#"{"id":1,"request":{"method":"GetUserChats"}}"#)
            .unwrap();
        assert_eq!(frame.request, HubRequest::GetUserChats);
        assert!(!frame.request.is_anonymous());
    }

    #[test]
    fn error_response_survives_the_wire() {
        let frame = ServerFrame::Response {
            id: 3,
            result: Err(HubError::new(HubErrorKind::NotFound, "Chat not found")),
        };
        let back = ServerFrame::from_json(&frame.to_json().unwrap()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn event_frame_names_the_event() {
        let frame = ServerFrame::Event(HubEvent::AccessDenied {
            reason: "primary device required".into(),
        });
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["kind"], "Event");
        assert_eq!(value["body"]["event"], "AccessDenied");
    }
}
