//! Pluggable persistence consumed by the [`Supervisor`](crate::gateway::supervisor::Supervisor).
//!
//! Concrete durable backends (file, relational DB) are out of scope for the
//! core; a binary embedding it supplies those. The in-memory implementations
//! here back the core's own tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{Configuration, LogEntry, LogLevel, SessionResume};

/// Errors raised by a store implementation. Kept separate from
/// [`gateway::Error`](crate::gateway::Error) because stores are a different
/// failure domain (I/O, serialization) than the socket.
#[derive(Debug)]
pub enum StoreError {
    NotFound,
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "no entry found"),
            Self::Backend(reason) => write!(f, "store backend error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Holds the one configuration document: the list of servers to manage plus
/// the global default status and the TOS-acknowledgement gate.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<Configuration>;
    /// Validates every [`ServerEntry`](crate::model::ServerEntry) before
    /// committing; implementations should make the write atomic.
    async fn save(&self, config: Configuration) -> Result<()>;
}

/// Resumption tuples, keyed by `server_id`. Optional: a supervisor with no
/// `SessionStore` simply never resumes across restarts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, resume: SessionResume) -> Result<()>;
    async fn load(&self, server_id: &str) -> Result<Option<SessionResume>>;
    async fn delete(&self, server_id: &str) -> Result<()>;
    async fn update_sequence(&self, server_id: &str, sequence: u64) -> Result<()>;
}

/// Bounded log retention, consumed by the Hub's best-effort log mirroring.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn add_log(&self, level: LogLevel, message: &str) -> Result<()>;
    async fn get_logs(&self, level: Option<LogLevel>) -> Result<Vec<LogEntry>>;
}

/// In-memory [`ConfigStore`], `RwLock`-protected, used by the core's own
/// tests and suitable as a starting point for a binary with no durable
/// config backend yet.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    inner: RwLock<Configuration>,
}

impl InMemoryConfigStore {
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load(&self) -> Result<Configuration> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, config: Configuration) -> Result<()> {
        for server in &config.servers {
            server
                .validate()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        *self.inner.write().await = config;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<HashMap<String, SessionResume>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, resume: SessionResume) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(resume.server_id.clone(), resume);
        Ok(())
    }

    async fn load(&self, server_id: &str) -> Result<Option<SessionResume>> {
        Ok(self.inner.read().await.get(server_id).cloned())
    }

    async fn delete(&self, server_id: &str) -> Result<()> {
        self.inner.write().await.remove(server_id);
        Ok(())
    }

    async fn update_sequence(&self, server_id: &str, sequence: u64) -> Result<()> {
        if let Some(resume) = self.inner.write().await.get_mut(server_id) {
            resume.sequence = sequence;
        }
        Ok(())
    }
}

/// Caps retained entries at `capacity`, evicting oldest first.
#[derive(Debug)]
pub struct InMemoryLogSink {
    capacity: usize,
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryLogSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryLogSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl LogSink for InMemoryLogSink {
    async fn add_log(&self, level: LogLevel, message: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.push(LogEntry::new(level, message));
        let overflow = entries.len().saturating_sub(self.capacity);
        if overflow > 0 {
            entries.drain(0..overflow);
        }
        Ok(())
    }

    async fn get_logs(&self, level: Option<LogLevel>) -> Result<Vec<LogEntry>> {
        let entries = self.entries.read().await;
        Ok(match level {
            Some(level) => entries.iter().filter(|e| e.level == level).cloned().collect(),
            None => entries.clone(),
        })
    }
}
