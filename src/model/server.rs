//! The server module describes a single configured target server: a guild
//! (and optionally a voice channel within it) the supervisor may join.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A single row of the external server configuration.
///
/// Invariant: `id`, `guild_id` and `channel_id` are non-empty when the
/// server is scheduled to connect, and `priority` is at least 1. Validated
/// by [`ServerEntry::validate`] before a [`ConfigStore::Save`](crate::store::ConfigStore::save).
pub struct ServerEntry {
    /// Stable identifier for this entry, independent of `guild_id`.
    pub id: String,
    /// The guild this session should identify as a member of.
    pub guild_id: String,
    /// The voice channel to join on ready. Empty means "stay out of voice".
    #[serde(default)]
    pub channel_id: String,
    /// Whether the supervisor should `Join` this server automatically on startup.
    pub connect_on_start: bool,
    /// Lower values are joined earlier when starting many servers at once.
    pub priority: u32,
    /// Optional human-readable name for the guild, resolved out-of-band.
    #[serde(default)]
    pub guild_name: Option<String>,
    /// Optional human-readable name for the channel, resolved out-of-band.
    #[serde(default)]
    pub channel_name: Option<String>,
}

/// Why a [`ServerEntry`] failed validation before being persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEntryError {
    /// `id` was empty.
    MissingId,
    /// `guild_id` was empty while the entry is scheduled to connect.
    MissingGuildId,
    /// `priority` was zero.
    InvalidPriority,
}

impl std::fmt::Display for ServerEntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingId => write!(f, "server entry id must not be empty"),
            Self::MissingGuildId => write!(f, "server entry guild_id must not be empty"),
            Self::InvalidPriority => write!(f, "server entry priority must be >= 1"),
        }
    }
}

impl std::error::Error for ServerEntryError {}

impl ServerEntry {
    /// Validates the invariants from the data model: non-empty `id`/`guild_id`
    /// and `priority >= 1`. `channel_id` is allowed to be empty (it means
    /// "leave/stay out of the channel").
    pub fn validate(&self) -> Result<(), ServerEntryError> {
        if self.id.is_empty() {
            return Err(ServerEntryError::MissingId);
        }
        if self.guild_id.is_empty() {
            return Err(ServerEntryError::MissingGuildId);
        }
        if self.priority == 0 {
            return Err(ServerEntryError::InvalidPriority);
        }
        Ok(())
    }

    /// Whether this entry asks to be in a voice channel once connected.
    #[must_use]
    pub fn wants_voice(&self) -> bool {
        !self.channel_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ServerEntry {
        ServerEntry {
            id: "s1".to_string(),
            guild_id: "g1".to_string(),
            channel_id: String::new(),
            connect_on_start: true,
            priority: 1,
            guild_name: None,
            channel_name: None,
        }
    }

    #[test]
    fn valid_entry_passes() {
        assert!(entry().validate().is_ok());
    }

    #[test]
    fn empty_id_is_rejected() {
        let mut e = entry();
        e.id.clear();
        assert_eq!(e.validate(), Err(ServerEntryError::MissingId));
    }

    #[test]
    fn empty_guild_id_is_rejected() {
        let mut e = entry();
        e.guild_id.clear();
        assert_eq!(e.validate(), Err(ServerEntryError::MissingGuildId));
    }

    #[test]
    fn zero_priority_is_rejected() {
        let mut e = entry();
        e.priority = 0;
        assert_eq!(e.validate(), Err(ServerEntryError::InvalidPriority));
    }

    #[test]
    fn empty_channel_id_means_no_voice() {
        assert!(!entry().wants_voice());
    }
}
