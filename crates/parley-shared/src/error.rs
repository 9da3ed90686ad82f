use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client-visible failure categories. Clients use the kind to decide between
/// retrying, refreshing, and sending the user back to the login prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HubErrorKind {
    /// Bad or missing input. Do not retry.
    Validation,
    /// Unknown device, chat, sender or user. Refresh instead of retrying.
    NotFound,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Restricted user on a non-primary device.
    AccessDenied,
    /// Store or transport hiccup. Safe to retry.
    Transient,
}

impl HubErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, HubErrorKind::Transient)
    }
}

/// Error payload carried in a failed hub response.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct HubError {
    pub kind: HubErrorKind,
    pub message: String,
}

impl HubError {
    pub fn new(kind: HubErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(HubErrorKind::Transient.is_retryable());
        assert!(!HubErrorKind::NotFound.is_retryable());
        assert!(!HubErrorKind::Validation.is_retryable());
        assert!(!HubErrorKind::AccessDenied.is_retryable());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = HubError::new(HubErrorKind::Validation, "Message content is empty");
        assert_eq!(err.to_string(), "Validation: Message content is empty");
    }
}
