//! # parley-client
//!
//! Client side of the Parley hub: a reconnection controller that keeps one
//! live link to the hub, correlates requests with their responses, and
//! hands pushed events to the embedding application.
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley_client::{ClientConfig, ReconnectController, ReconnectPolicy, WsConnector};
//!
//! # async fn demo() -> Result<(), parley_client::ClientError> {
//! let config = ClientConfig::new("ws://127.0.0.1:8080/hub").with_device("Laptop", "Linux");
//! let hub = ReconnectController::new(config, ReconnectPolicy::default(), Arc::new(WsConnector));
//! hub.connect(false).await?;
//! hub.login("alice", "correct horse").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod policy;
pub mod transport;

pub use config::ClientConfig;
pub use controller::ReconnectController;
pub use error::ClientError;
pub use policy::ReconnectPolicy;
pub use transport::{Connector, HandshakeRequest, Session, WsConnector};
