//! In-memory session state and the values derived from it for external
//! observers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The state machine driven internally by a [`Session`](crate::gateway::session::Session).
///
/// Only the session itself mutates this; everything else reads a snapshot
/// through [`Session::state`](crate::gateway::session::Session::state).
pub enum SessionState {
    /// No socket; either never connected or torn down after a disconnect.
    Disconnected,
    /// Dialing and waiting for `Hello`/`Ready`.
    Connecting,
    /// `Ready` or `Resumed` observed; heartbeats flowing.
    Connected,
    /// Terminal. `Close` was called; nothing will reconnect this session again.
    Closed,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The UI-facing status derived from [`SessionState`] plus reconnector activity.
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
    Backoff,
}

impl From<SessionState> for ConnectionStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Disconnected | SessionState::Closed => Self::Disconnected,
            SessionState::Connecting => Self::Connecting,
            SessionState::Connected => Self::Connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The resumption tuple persisted per `server_id`, used to re-attach after a
/// disconnect or process restart without re-identifying.
pub struct SessionResume {
    pub server_id: String,
    pub session_id: String,
    pub sequence: u64,
    pub resume_gateway_url: String,
}
