use thiserror::Error;

use parley_shared::HubError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to the hub")]
    NotConnected,

    #[error("Connection to the hub was lost")]
    ConnectionLost,

    /// The hub refused the handshake credentials. Retrying with the same
    /// token cannot succeed.
    #[error("Hub rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Handshake failed after {attempts} attempts: {last}")]
    HandshakeExhausted { attempts: u32, last: String },

    #[error("Connect attempt was superseded")]
    Superseded,

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ClientError {
    /// Whether repeating the handshake within the current round can help.
    /// The supervisor backs off and retries after every error regardless.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::NotConnected
            | ClientError::ConnectionLost
            | ClientError::Handshake(_)
            | ClientError::HandshakeExhausted { .. }
            | ClientError::Timeout => true,
            ClientError::Hub(e) => e.kind.is_retryable(),
            ClientError::Unauthorized(_)
            | ClientError::Superseded
            | ClientError::InvalidConfig(_)
            | ClientError::UnexpectedResponse(_) => false,
        }
    }
}
