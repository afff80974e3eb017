//! The one piece of configuration the core owns directly: the gateway URL,
//! token, and the tunables governing session admission and liveness.
//!
//! Everything else (the server list, the TOS flag, the default status) lives
//! in [`Configuration`](crate::model::Configuration) behind the
//! [`ConfigStore`](crate::store::ConfigStore). This struct is constructed by
//! the embedding binary, typically from environment variables loaded via
//! `dotenvy` in development; the core never parses a file itself.

/// Default canonical gateway endpoint for fresh (non-resume) connections.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
/// Default cap on concurrently live sessions: `|OS_LIST| * |BROWSER_LIST|`.
pub const DEFAULT_MAX_SESSIONS: usize = 35;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEARTBEAT_ACK_TIMEOUT_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub gateway_url: String,
    pub max_sessions: usize,
    pub max_reconnect_attempts: u32,
    pub heartbeat_ack_timeout_multiplier: u32,
}

impl GatewayConfig {
    /// Builds a config with every tunable at its documented default, varying
    /// only the token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_ack_timeout_multiplier: DEFAULT_HEARTBEAT_ACK_TIMEOUT_MULTIPLIER,
        }
    }
}
