/// Protocol version reported by `/health`.
pub const PROTOCOL_VERSION: &str = "/parley/1.0.0";

/// Path of the WebSocket hub endpoint.
pub const HUB_PATH: &str = "/hub";

/// Handshake header naming the connecting device.
pub const DEVICE_NAME_HEADER: &str = "Device-Name";

/// Query parameter that may carry the bearer token on the upgrade request.
pub const ACCESS_TOKEN_QUERY: &str = "access_token";

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Substituted when a login does not name its device.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";
pub const UNKNOWN_DEVICE_INFO: &str = "Unknown Platform";

/// Username length bounds (characters).
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 32;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Default maximum message length in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Session token lifetime (7 days).
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 168;
