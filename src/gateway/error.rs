//! Errors raised by the socket and session layers.

use std::fmt::Display;

/// The taxonomy from the error-handling design: the session reports these
/// and never retries internally — only the [`Reconnector`](super::reconnector::Reconnector)
/// and [`Supervisor`](super::supervisor::Supervisor) are allowed to retry.
#[derive(Debug)]
pub enum Error {
    /// TCP/TLS/handshake failure while dialing.
    DialFailed(String),
    /// The socket closed with a non-fatal code, or a read timed out/reset.
    TransientClose { code: Option<u16>, reason: String },
    /// The socket closed with a code in the fatal set; retry is abandoned.
    FatalClose { code: u16, reason: String },
    /// Close code 4004, or the server otherwise indicated bad credentials.
    AuthFailed,
    /// `InvalidSession` with a `true` payload: soft warning, same socket.
    InvalidSessionResumable,
    /// `InvalidSession` with a `false` payload: session must be re-identified.
    InvalidSessionFresh,
    /// Close code 4008: back off harder than the normal schedule.
    RateLimited,
    /// A presence/voice command was sent with no live socket.
    NotConnected,
    /// `Resume` was attempted without a stored session id.
    NoSessionToResume,
    Json(serde_json::Error),
    Websocket(tokio_tungstenite::tungstenite::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Websocket(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DialFailed(reason) => write!(f, "dial failed: {reason}"),
            Self::TransientClose { code, reason } => {
                write!(f, "transient close (code {code:?}): {reason}")
            }
            Self::FatalClose { code, reason } => write!(f, "fatal close (code {code}): {reason}"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::InvalidSessionResumable => write!(f, "invalid session (resumable)"),
            Self::InvalidSessionFresh => write!(f, "invalid session (not resumable)"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::NotConnected => write!(f, "no live socket for this session"),
            Self::NoSessionToResume => write!(f, "no session to resume"),
            Self::Json(e) => Display::fmt(e, f),
            Self::Websocket(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Websocket(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Whether this error represents a fatal, unrecoverable close per the
    /// close-code classification in [`crate::gateway::opcodes`].
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalClose { .. } | Self::AuthFailed)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
