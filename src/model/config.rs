//! The configuration document owned by the [`ConfigStore`](crate::store::ConfigStore).
//!
//! Loading/saving this document over HTTP is explicitly out of scope; the
//! core only needs a typed shape to hand the store and to broadcast on
//! `config_changed`.

use serde::{Deserialize, Serialize};

use super::server::ServerEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub servers: Vec<ServerEntry>,
    /// The default presence status (`online`, `idle`, `dnd`, ...) applied to
    /// sessions that don't have a more specific override.
    pub status: String,
    /// Gate checked by `Supervisor::join`: no session may connect until this
    /// is true.
    pub tos_acknowledged: bool,
}

impl Configuration {
    /// Finds a configured server by its stable `id`.
    #[must_use]
    pub fn find(&self, server_id: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.id == server_id)
    }
}
