//! The crate-level error returned by [`Supervisor`](crate::gateway::supervisor::Supervisor)
//! operations: admission denials plus whatever the socket layer or a store
//! surfaced.

use std::fmt::Display;

use crate::gateway;
use crate::store::StoreError;

#[derive(Debug)]
pub enum Error {
    /// `Join` was attempted before the global TOS-acknowledgement flag is set.
    TosNotAcknowledged,
    /// `Join` was attempted for a server that already has a live session.
    AlreadyConnected,
    /// `Join` was attempted while `max_sessions` live sessions already exist.
    TooManyConnections,
    /// `Join`/`Rejoin` referenced a `server_id` absent from the configuration.
    ServerNotFound,
    /// `Exit`/`Rejoin` referenced a `server_id` with no live session.
    NotConnected,
    Gateway(gateway::error::Error),
    Store(StoreError),
}

impl From<gateway::error::Error> for Error {
    fn from(e: gateway::error::Error) -> Self {
        Self::Gateway(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TosNotAcknowledged => write!(f, "terms of service not acknowledged"),
            Self::AlreadyConnected => write!(f, "server already has a live session"),
            Self::TooManyConnections => write!(f, "too many live sessions"),
            Self::ServerNotFound => write!(f, "server not found in configuration"),
            Self::NotConnected => write!(f, "server has no live session"),
            Self::Gateway(e) => Display::fmt(e, f),
            Self::Store(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Gateway(e) => Some(e),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
