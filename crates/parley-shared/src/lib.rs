//! # parley-shared
//!
//! Types shared by the Parley hub and its clients: typed identifiers, the
//! JSON wire protocol spoken over the hub WebSocket, and the client-visible
//! error kinds.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{HubError, HubErrorKind};
pub use protocol::*;
pub use types::*;
