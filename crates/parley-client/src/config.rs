//! Client configuration.

use std::time::Duration;

use parley_shared::constants::{UNKNOWN_DEVICE_NAME, HUB_PATH};

/// Where the hub lives and how this device introduces itself.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full WebSocket URL of the hub endpoint, e.g. `ws://host:8080/hub`.
    pub hub_url: String,

    /// Sent as the `Device-Name` handshake header and with `Login`.
    pub device_name: String,

    /// Free-form platform description sent with `Login`/`Register`.
    pub device_info: String,

    /// How long `invoke` waits for its response.
    pub request_timeout: Duration,

    /// Capacity of the pushed-event channel. Slow subscribers past this lag
    /// and lose the oldest events.
    pub event_buffer: usize,
}

impl ClientConfig {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            ..Self::default()
        }
    }

    pub fn with_device(mut self, name: impl Into<String>, info: impl Into<String>) -> Self {
        self.device_name = name.into();
        self.device_info = info.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: format!("ws://127.0.0.1:8080{HUB_PATH}"),
            device_name: UNKNOWN_DEVICE_NAME.to_string(),
            device_info: std::env::consts::OS.to_string(),
            request_timeout: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}
