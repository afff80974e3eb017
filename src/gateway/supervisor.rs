//! Owns the live set of sessions for one token: admission control, join
//! lifecycle, status fan-out to the hub, and resume persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::model::{ConnectionStatus, LogLevel, ServerEntry, SessionResume, SessionState};
use crate::store::{ConfigStore, LogSink, SessionStore};

use super::error::Error as GatewayError;
use super::reconnector::Reconnector;
use super::session::{Session, SessionCallbacks};

struct Entry {
    session: Arc<Session>,
    reconnector: Arc<Reconnector>,
    watchdog: JoinHandle<()>,
    fatal: Arc<AtomicBool>,
}

/// The supervisor's view of a session's external status, independent of its
/// internal [`SessionState`]: folds in reconnect-in-progress (`backoff`) and
/// permanently-failed (`error`) which `SessionState` alone cannot express.
pub struct Supervisor {
    config: GatewayConfig,
    hub: Hub,
    config_store: Arc<dyn ConfigStore>,
    session_store: Option<Arc<dyn SessionStore>>,
    log_sink: Option<Arc<dyn LogSink>>,
    sessions: Mutex<HashMap<String, Entry>>,
    statuses: Arc<Mutex<HashMap<String, ConnectionStatus>>>,
    stopping: Arc<AtomicBool>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor").finish_non_exhaustive()
    }
}

impl Supervisor {
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        hub: Hub,
        config_store: Arc<dyn ConfigStore>,
        session_store: Option<Arc<dyn SessionStore>>,
        log_sink: Option<Arc<dyn LogSink>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            config_store,
            session_store,
            log_sink,
            sessions: Mutex::new(HashMap::new()),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Snapshot of one server's externally-observable status.
    pub async fn get_status(&self, server_id: &str) -> Option<ConnectionStatus> {
        self.statuses.lock().await.get(server_id).copied()
    }

    /// Snapshot of every server's externally-observable status.
    pub async fn get_all_statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.statuses.lock().await.clone()
    }

    /// Admits and connects a server entry. Fails admission with
    /// [`Error::TosNotAcknowledged`], [`Error::AlreadyConnected`],
    /// [`Error::TooManyConnections`] or [`Error::ServerNotFound`] before any
    /// socket is opened.
    pub async fn join(self: &Arc<Self>, server_id: &str) -> Result<()> {
        let configuration = self.config_store.load().await?;
        if !configuration.tos_acknowledged {
            return Err(Error::TosNotAcknowledged);
        }
        let entry = configuration
            .find(server_id)
            .cloned()
            .ok_or(Error::ServerNotFound)?;

        // Admission checks and the eventual insert both touch `sessions`, but
        // the dial and the resume-tuple lookup in between are real I/O and
        // must never happen with the lock held.
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(server_id) {
                return Err(Error::AlreadyConnected);
            }
            if sessions.len() >= self.config.max_sessions {
                return Err(Error::TooManyConnections);
            }
        }

        let resume = match &self.session_store {
            Some(store) => store.load(server_id).await.ok().flatten(),
            None => None,
        };

        let fatal = Arc::new(AtomicBool::new(false));
        let callbacks = Arc::new(SupervisorCallbacks {
            hub: self.hub.clone(),
            session_store: self.session_store.clone(),
            log_sink: self.log_sink.clone(),
            voice: entry
                .wants_voice()
                .then(|| (entry.guild_id.clone(), entry.channel_id.clone())),
            statuses: Arc::clone(&self.statuses),
            fatal: Arc::clone(&fatal),
            session: OnceLock::new(),
        });

        let session = Session::new_with_heartbeat_ack_timeout_multiplier(
            server_id,
            self.config.token.clone(),
            self.config.gateway_url.clone(),
            configuration.status.clone(),
            Arc::clone(&callbacks) as Arc<dyn SessionCallbacks>,
            self.config.heartbeat_ack_timeout_multiplier,
        );
        let _ = callbacks.session.set(Arc::downgrade(&session));

        if let Some(resume) = resume {
            session.set_resume_data(resume).await;
        }

        session.connect().await?;

        let reconnector = Arc::new(Reconnector::new(self.config.max_reconnect_attempts));
        let watchdog = spawn_watchdog(
            Arc::clone(&session),
            Arc::clone(&reconnector),
            self.hub.clone(),
            Arc::clone(&self.statuses),
            Arc::clone(&fatal),
            Arc::clone(&self.stopping),
            server_id.to_string(),
        );

        {
            let mut sessions = self.sessions.lock().await;
            // Re-check: another `join` may have won the race while we were
            // dialing. Roll back the socket we just opened rather than let
            // two entries fight over one `server_id`.
            if sessions.contains_key(server_id) {
                watchdog.abort();
                session.close().await;
                return Err(Error::AlreadyConnected);
            }
            if sessions.len() >= self.config.max_sessions {
                watchdog.abort();
                session.close().await;
                return Err(Error::TooManyConnections);
            }
            sessions.insert(
                server_id.to_string(),
                Entry {
                    session,
                    reconnector,
                    watchdog,
                    fatal,
                },
            );
        }
        self.statuses
            .lock()
            .await
            .insert(server_id.to_string(), ConnectionStatus::Connecting);

        Ok(())
    }

    /// Atomic close-and-join: force-closes any current session without
    /// clearing its resume tuple, then performs `Join` semantics (which will
    /// attempt a resume, since the tuple is untouched).
    pub async fn rejoin(self: &Arc<Self>, server_id: &str) -> Result<()> {
        let entry = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(server_id).ok_or(Error::NotConnected)?
        };
        entry.watchdog.abort();
        entry.session.close().await;
        self.join(server_id).await
    }

    /// Closes the session and deletes any persisted resume tuple; a later
    /// `Join` starts fresh.
    pub async fn exit(&self, server_id: &str) -> Result<()> {
        let entry = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(server_id).ok_or(Error::NotConnected)?
        };
        entry.watchdog.abort();
        entry.session.close().await;

        if let Some(store) = &self.session_store {
            let _ = store.delete(server_id).await;
        }
        self.statuses
            .lock()
            .await
            .insert(server_id.to_string(), ConnectionStatus::Disconnected);
        Ok(())
    }

    /// Updates the default presence status for sessions connected from now
    /// on, pushes it live to every currently-connected session, and
    /// broadcasts `config_changed`.
    pub async fn update_global_status(&self, status: &str) -> Result<()> {
        let mut configuration = self.config_store.load().await?;
        configuration.status = status.to_string();
        self.config_store.save(configuration.clone()).await?;

        let sessions = self.sessions.lock().await;
        for entry in sessions.values() {
            if let Err(e) = entry.session.send_presence_update(status).await {
                warn!(server_id = entry.session.server_id(), error = %e, "failed to push presence update");
            }
        }
        drop(sessions);

        self.hub.broadcast_config_changed(configuration);
        Ok(())
    }

    /// Stops the watchdogs from retrying and closes every live session.
    /// Intended for process shutdown; idempotent.
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut sessions = self.sessions.lock().await;
        for (server_id, entry) in sessions.drain() {
            entry.reconnector.stop();
            entry.watchdog.abort();
            entry.session.close().await;
            info!(server_id, "session closed during supervisor shutdown");
        }
    }
}

fn spawn_watchdog(
    session: Arc<Session>,
    reconnector: Arc<Reconnector>,
    hub: Hub,
    statuses: Arc<Mutex<HashMap<String, ConnectionStatus>>>,
    fatal: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    server_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state_rx = session.subscribe_state();
        loop {
            if state_rx.changed().await.is_err() {
                return;
            }
            let state = *state_rx.borrow_and_update();

            match state {
                SessionState::Disconnected => {
                    if fatal.load(Ordering::SeqCst) || stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    statuses
                        .lock()
                        .await
                        .insert(server_id.clone(), ConnectionStatus::Backoff);
                    hub.broadcast_status(server_id.clone(), ConnectionStatus::Backoff, "reconnecting");

                    match reconnector.run(&session).await {
                        Ok(()) => {
                            statuses
                                .lock()
                                .await
                                .insert(server_id.clone(), ConnectionStatus::Connecting);
                            hub.broadcast_status(
                                server_id.clone(),
                                ConnectionStatus::Connecting,
                                "socket re-established",
                            );
                        }
                        Err(_) => {
                            statuses
                                .lock()
                                .await
                                .insert(server_id.clone(), ConnectionStatus::Error);
                            hub.broadcast_status(
                                server_id.clone(),
                                ConnectionStatus::Error,
                                "reconnect attempts exhausted",
                            );
                            return;
                        }
                    }
                }
                SessionState::Closed => return,
                SessionState::Connecting | SessionState::Connected => {}
            }
        }
    })
}

/// Wires one session's callbacks to the hub and the stores. Holds a weak
/// reference to the session itself (set right after construction) so that
/// `on_ready` can read the session's own sequence/session-id/resume-url
/// without those being threaded through the callback signature.
struct SupervisorCallbacks {
    hub: Hub,
    session_store: Option<Arc<dyn SessionStore>>,
    log_sink: Option<Arc<dyn LogSink>>,
    voice: Option<(String, String)>,
    statuses: Arc<Mutex<HashMap<String, ConnectionStatus>>>,
    fatal: Arc<AtomicBool>,
    session: OnceLock<Weak<Session>>,
}

impl SupervisorCallbacks {
    fn error_code(error: &GatewayError) -> &'static str {
        match error {
            GatewayError::FatalClose { .. } => "gateway_error",
            GatewayError::AuthFailed => "auth_failed",
            GatewayError::InvalidSessionResumable | GatewayError::InvalidSessionFresh => "gateway_error",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::DialFailed(_) => "connection_failed",
            GatewayError::TransientClose { .. } => "disconnected",
            GatewayError::NotConnected | GatewayError::NoSessionToResume => "gateway_error",
            GatewayError::Json(_) | GatewayError::Websocket(_) => "gateway_error",
        }
    }
}

#[async_trait]
impl SessionCallbacks for SupervisorCallbacks {
    async fn on_ready(&self, server_id: &str, session_id: &str) {
        self.statuses
            .lock()
            .await
            .insert(server_id.to_string(), ConnectionStatus::Connected);
        self.hub.broadcast_status(
            server_id,
            ConnectionStatus::Connected,
            format!("ready: {session_id}"),
        );

        let Some(session) = self.session.get().and_then(Weak::upgrade) else {
            return;
        };

        if let Some(store) = &self.session_store {
            let resume = SessionResume {
                server_id: server_id.to_string(),
                session_id: session_id.to_string(),
                sequence: session.sequence().await,
                resume_gateway_url: session.resume_url().await.unwrap_or_default(),
            };
            if let Err(e) = store.save(resume).await {
                warn!(server_id, error = %e, "failed to persist resume tuple");
            }
        }

        if let Some((guild_id, channel_id)) = &self.voice {
            if let Err(e) = session
                .send_voice_state_update(guild_id, channel_id, false, false)
                .await
            {
                warn!(server_id, error = %e, "failed to join voice channel on ready");
            }
        }
    }

    async fn on_state_change(&self, server_id: &str, state: SessionState) {
        let status = ConnectionStatus::from(state);
        self.statuses
            .lock()
            .await
            .insert(server_id.to_string(), status);
        self.hub
            .broadcast_status(server_id, status, format!("{state:?}"));
    }

    async fn on_disconnect(&self, server_id: &str, code: Option<u16>, reason: &str) {
        self.hub.broadcast_status(
            server_id,
            ConnectionStatus::Disconnected,
            format!("disconnected (code {code:?}): {reason}"),
        );
    }

    async fn on_error(&self, server_id: &str, error: &GatewayError) {
        let code = Self::error_code(error);
        self.hub
            .broadcast_error(code, error.to_string(), Some(server_id.to_string()));

        if let Some(sink) = &self.log_sink {
            let _ = sink.add_log(LogLevel::Error, &error.to_string()).await;
        }

        if error.is_fatal() {
            self.fatal.store(true, Ordering::SeqCst);
            self.statuses
                .lock()
                .await
                .insert(server_id.to_string(), ConnectionStatus::Error);
        }
    }
}
