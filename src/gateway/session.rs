//! One WebSocket's full lifecycle: connect, hello, identify/resume,
//! dispatch/heartbeat, close. The hard part of the whole crate — see
//! module docs on [`crate::gateway`] for the state diagram this implements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::model::status::{SessionResume, SessionState};

use super::error::{Error, Result};
use super::frame::{
    heartbeat_frame, identify_frame, presence_update_frame, resume_frame,
    voice_state_update_frame, EVENT_READY, EVENT_RESUMED,
};
use super::opcodes::OpCode;
use super::properties::{next_properties, ClientProperties};
use super::websocket::{self, WebsocketWriter};

/// Close code sent when a heartbeat ack is overdue ("protocol error").
const CLOSE_MISSED_ACK: u16 = 1002;
/// Close code sent by an explicit, user-initiated [`Session::close`].
const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code sent after a non-resumable invalid session.
const CLOSE_NORMAL: u16 = 1000;
/// How long [`Session::close`] waits for the read loop to exit.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Four callback slots invoked at most once per transition, from the
/// session's own task, never re-entrantly. In a channel-native language
/// these would be a typed event stream; here they're an `async_trait`
/// object the [`Supervisor`](crate::gateway::supervisor::Supervisor) implements
/// to wire the Hub and the resume store.
#[async_trait]
pub trait SessionCallbacks: Send + Sync {
    async fn on_ready(&self, server_id: &str, session_id: &str);
    async fn on_state_change(&self, server_id: &str, state: SessionState);
    async fn on_disconnect(&self, server_id: &str, code: Option<u16>, reason: &str);
    async fn on_error(&self, server_id: &str, error: &Error);
}

/// A callback set that does nothing; useful for tests that only care about
/// the session's own state machine.
#[derive(Debug, Clone, Copy)]
pub struct NoopCallbacks;

#[async_trait]
impl SessionCallbacks for NoopCallbacks {
    async fn on_ready(&self, _server_id: &str, _session_id: &str) {}
    async fn on_state_change(&self, _server_id: &str, _state: SessionState) {}
    async fn on_disconnect(&self, _server_id: &str, _code: Option<u16>, _reason: &str) {}
    async fn on_error(&self, _server_id: &str, _error: &Error) {}
}

#[derive(Debug)]
struct SessionData {
    sequence: u64,
    session_id: Option<String>,
    resume_url: Option<String>,
    heartbeat_interval: Option<Duration>,
    last_ack: Instant,
}

impl SessionData {
    fn fresh() -> Self {
        Self {
            sequence: 0,
            session_id: None,
            resume_url: None,
            heartbeat_interval: None,
            last_ack: Instant::now(),
        }
    }
}

/// A single gateway WebSocket's lifecycle manager.
///
/// Constructed with [`Session::new`], which returns an `Arc` because the
/// read loop and heartbeat loop are independent spawned tasks that each
/// need a handle back into shared state.
pub struct Session {
    server_id: String,
    token: String,
    gateway_url: String,
    properties: ClientProperties,
    heartbeat_ack_timeout_multiplier: u32,
    status: RwLock<String>,
    data: RwLock<SessionData>,
    state_tx: watch::Sender<SessionState>,
    callbacks: Arc<dyn SessionCallbacks>,
    writer: Mutex<Option<WebsocketWriter>>,
    read_stop: Arc<Notify>,
    heartbeat_stop: Arc<Notify>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_id", &self.server_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds a new session. Claims the next client-property rotation index
    /// immediately, independent of when `connect` is actually called.
    #[must_use]
    pub fn new(
        server_id: impl Into<String>,
        token: impl Into<String>,
        gateway_url: impl Into<String>,
        default_status: impl Into<String>,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Arc<Self> {
        Self::new_with_heartbeat_ack_timeout_multiplier(
            server_id,
            token,
            gateway_url,
            default_status,
            callbacks,
            crate::config::DEFAULT_HEARTBEAT_ACK_TIMEOUT_MULTIPLIER,
        )
    }

    /// Builds a new session with an explicit heartbeat-ack timeout
    /// multiplier, per [`crate::config::GatewayConfig::heartbeat_ack_timeout_multiplier`].
    #[must_use]
    pub fn new_with_heartbeat_ack_timeout_multiplier(
        server_id: impl Into<String>,
        token: impl Into<String>,
        gateway_url: impl Into<String>,
        default_status: impl Into<String>,
        callbacks: Arc<dyn SessionCallbacks>,
        heartbeat_ack_timeout_multiplier: u32,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Arc::new(Self {
            server_id: server_id.into(),
            token: token.into(),
            gateway_url: gateway_url.into(),
            properties: next_properties(),
            heartbeat_ack_timeout_multiplier,
            status: RwLock::new(default_status.into()),
            data: RwLock::new(SessionData::fresh()),
            state_tx,
            callbacks,
            writer: Mutex::new(None),
            read_stop: Arc::new(Notify::new()),
            heartbeat_stop: Arc::new(Notify::new()),
            read_task: Mutex::new(None),
            heartbeat_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Snapshot of the current state machine position.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// A receiver that wakes on every state transition; used by the
    /// supervisor's watchdog to notice `Disconnected` without polling.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.data.read().await.session_id.clone()
    }

    pub async fn sequence(&self) -> u64 {
        self.data.read().await.sequence
    }

    pub async fn resume_url(&self) -> Option<String> {
        self.data.read().await.resume_url.clone()
    }

    /// Installs a previously persisted resume tuple. Must be called before
    /// [`Session::connect`] for a resume (rather than fresh identify) to be
    /// attempted.
    pub async fn set_resume_data(&self, resume: SessionResume) {
        let mut data = self.data.write().await;
        data.session_id = Some(resume.session_id);
        data.sequence = resume.sequence;
        data.resume_url = Some(resume.resume_gateway_url);
    }

    async fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
        self.callbacks.on_state_change(&self.server_id, state).await;
    }

    /// Dials the gateway (resume URL if one is set, else the canonical URL)
    /// and spawns the read loop. Identify/Resume is sent once `Hello`
    /// arrives, from within the read loop.
    ///
    /// # Errors
    /// Returns [`Error::DialFailed`] if the socket cannot be established.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Connecting).await;

        let url = {
            let data = self.data.read().await;
            match &data.resume_url {
                Some(resume) => format!("{resume}/?v=10&encoding=json"),
                None => self.gateway_url.clone(),
            }
        };

        let (writer, reader) = match websocket::connect(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(SessionState::Disconnected).await;
                return Err(e);
            }
        };

        *self.writer.lock().await = Some(writer);

        let session = Arc::clone(self);
        let mut reader = reader;
        let read_stop = Arc::clone(&self.read_stop);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = read_stop.notified() => return,
                    result = reader.receive() => {
                        match result {
                            Ok(Some(message)) => {
                                if session.handle_message(message).await.is_break() {
                                    return;
                                }
                            }
                            Ok(None) => continue,
                            Err(e) => {
                                session.handle_read_error(e).await;
                                return;
                            }
                        }
                    }
                }
            }
        });
        *self.read_task.lock().await = Some(handle);

        Ok(())
    }

    async fn handle_read_error(self: &Arc<Self>, error: Error) {
        if error.is_fatal() {
            self.callbacks.on_error(&self.server_id, &error).await;
        } else {
            let (code, reason) = match &error {
                Error::TransientClose { code, reason } => (*code, reason.clone()),
                other => (None, other.to_string()),
            };
            self.callbacks
                .on_disconnect(&self.server_id, code, &reason)
                .await;
        }
        self.heartbeat_stop.notify_waiters();
        if !self.closed.load(Ordering::SeqCst) {
            self.set_state(SessionState::Disconnected).await;
        }
    }

    /// Returns [`Flow::Break`] when the read loop should stop after this
    /// message (the caller will not call `receive` again).
    async fn handle_message(self: &Arc<Self>, message: super::frame::GatewayMessage) -> Flow {
        if let Some(seq) = message.sequence {
            let mut data = self.data.write().await;
            data.sequence = data.sequence.max(seq);
        }

        match message.op {
            OpCode::Hello => {
                if let Ok(hello) = message.hello() {
                    self.start_heartbeat_loop(Duration::from_millis(hello.heartbeat_interval))
                        .await;
                    self.identify_or_resume().await;
                } else {
                    warn!(server_id = %self.server_id, "malformed hello payload");
                }
                Flow::Continue
            }
            OpCode::Dispatch => {
                match message.event_type.as_deref() {
                    Some(EVENT_READY) => self.handle_ready(&message).await,
                    Some(EVENT_RESUMED) => self.handle_resumed().await,
                    _ => {}
                }
                Flow::Continue
            }
            OpCode::HeartbeatAck => {
                self.data.write().await.last_ack = Instant::now();
                Flow::Continue
            }
            OpCode::Heartbeat => {
                let seq = self.data.read().await.sequence;
                let _ = self.send_frame(&heartbeat_frame(Some(seq))).await;
                Flow::Continue
            }
            OpCode::Reconnect => {
                self.callbacks
                    .on_disconnect(&self.server_id, Some(0), "reconnect requested")
                    .await;
                self.heartbeat_stop.notify_waiters();
                if !self.closed.load(Ordering::SeqCst) {
                    self.set_state(SessionState::Disconnected).await;
                }
                Flow::Break
            }
            OpCode::InvalidSession => {
                self.handle_invalid_session(&message).await;
                if message.invalid_session_resumable() {
                    Flow::Continue
                } else {
                    Flow::Break
                }
            }
            OpCode::Identify | OpCode::PresenceUpdate | OpCode::VoiceStateUpdate | OpCode::Resume => {
                Flow::Continue
            }
            OpCode::Unknown => Flow::Continue,
        }
    }

    async fn handle_ready(self: &Arc<Self>, message: &super::frame::GatewayMessage) {
        let Ok(ready) = message.ready() else {
            warn!(server_id = %self.server_id, "malformed ready payload");
            return;
        };
        {
            let mut data = self.data.write().await;
            data.session_id = Some(ready.session_id.clone());
            data.resume_url = Some(ready.resume_gateway_url);
        }
        self.set_state(SessionState::Connected).await;
        self.callbacks
            .on_ready(&self.server_id, &ready.session_id)
            .await;
    }

    async fn handle_resumed(self: &Arc<Self>) {
        let session_id = self.data.read().await.session_id.clone().unwrap_or_default();
        self.set_state(SessionState::Connected).await;
        self.callbacks.on_ready(&self.server_id, &session_id).await;
    }

    async fn handle_invalid_session(self: &Arc<Self>, message: &super::frame::GatewayMessage) {
        let resumable = message.invalid_session_resumable();
        if resumable {
            self.callbacks
                .on_error(&self.server_id, &Error::InvalidSessionResumable)
                .await;
            debug!(server_id = %self.server_id, "invalid session, resumable: continuing to read");
            return;
        }

        self.callbacks
            .on_error(&self.server_id, &Error::InvalidSessionFresh)
            .await;
        {
            let mut data = self.data.write().await;
            data.session_id = None;
            data.sequence = 0;
            data.resume_url = None;
        }
        self.heartbeat_stop.notify_waiters();
        let _ = self.send_close(CLOSE_NORMAL, "invalid session").await;
        if !self.closed.load(Ordering::SeqCst) {
            self.set_state(SessionState::Disconnected).await;
        }
    }

    async fn identify_or_resume(self: &Arc<Self>) {
        let (session_id, resume_url, sequence) = {
            let data = self.data.read().await;
            (
                data.session_id.clone(),
                data.resume_url.clone(),
                data.sequence,
            )
        };

        let status = self.status.read().await.clone();

        let result = if let Some(session_id) = session_id.filter(|_| resume_url.is_some()) {
            self.send_frame(&resume_frame(&self.token, &session_id, sequence))
                .await
        } else {
            self.send_frame(&identify_frame(
                &self.token,
                self.properties.clone(),
                &status,
            ))
            .await
        };

        if let Err(e) = result {
            warn!(server_id = %self.server_id, error = %e, "failed to send identify/resume");
        }
    }

    async fn start_heartbeat_loop(self: &Arc<Self>, interval: Duration) {
        {
            let mut data = self.data.write().await;
            data.heartbeat_interval = Some(interval);
            data.last_ack = Instant::now();
        }

        if let Some(old) = self.heartbeat_task.lock().await.take() {
            old.abort();
        }

        let session = Arc::clone(self);
        let stop = Arc::clone(&self.heartbeat_stop);
        let timeout_multiplier = self.heartbeat_ack_timeout_multiplier;
        let handle = tokio::spawn(async move {
            let jitter = rand::thread_rng().gen_range(0.0..=1.0);
            let first_wait = interval.mul_f64(jitter);
            tokio::select! {
                () = tokio::time::sleep(first_wait) => {}
                () = stop.notified() => return,
            }

            loop {
                let seq = session.data.read().await.sequence;
                if session
                    .send_frame(&heartbeat_frame(Some(seq)))
                    .await
                    .is_err()
                {
                    return;
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        let last_ack = session.data.read().await.last_ack;
                        if last_ack.elapsed() > interval * timeout_multiplier {
                            warn!(server_id = %session.server_id, "missed heartbeat ack, closing");
                            let _ = session.send_close(CLOSE_MISSED_ACK, "protocol error / missed ack").await;
                            return;
                        }
                    }
                    () = stop.notified() => return,
                }
            }
        });
        *self.heartbeat_task.lock().await = Some(handle);
    }

    async fn send_frame(&self, frame: &serde_json::Value) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.send(frame).await,
            None => Err(Error::NotConnected),
        }
    }

    async fn send_close(&self, code: u16, reason: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.close(code, reason).await,
            None => Ok(()),
        }
    }

    /// Sends a presence update (op 3). Fails with [`Error::NotConnected`] if
    /// no socket is live.
    pub async fn send_presence_update(&self, status: &str) -> Result<()> {
        *self.status.write().await = status.to_string();
        self.send_frame(&presence_update_frame(status)).await
    }

    /// Sends a voice-state update (op 4). An empty `channel_id` leaves the
    /// channel. Fails with [`Error::NotConnected`] if no socket is live.
    pub async fn send_voice_state_update(
        &self,
        guild_id: &str,
        channel_id: &str,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<()> {
        self.send_frame(&voice_state_update_frame(
            guild_id, channel_id, self_mute, self_deaf,
        ))
        .await
    }

    /// Idempotent explicit close: stop both loops, close the socket with
    /// 1001, wait up to five seconds for the read loop, then transition to
    /// `Closed`. Never blocks indefinitely.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.heartbeat_stop.notify_waiters();
        self.read_stop.notify_waiters();
        let _ = self.send_close(CLOSE_GOING_AWAY, "going away").await;

        if let Some(handle) = self.read_task.lock().await.take() {
            if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                warn!(server_id = %self.server_id, "read loop did not exit within grace period");
            }
        }
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, handle).await;
        }

        *self.writer.lock().await = None;
        self.set_state(SessionState::Closed).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Break,
}

impl Flow {
    fn is_break(self) -> bool {
        matches!(self, Self::Break)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_session_starts_disconnected() {
        let session = Session::new("s1", "token", "wss://example/", "online", Arc::new(NoopCallbacks));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.sequence().await, 0);
        assert_eq!(session.session_id().await, None);
    }

    #[tokio::test]
    async fn set_resume_data_is_visible_through_getters() {
        let session = Session::new("s1", "token", "wss://example/", "online", Arc::new(NoopCallbacks));
        session
            .set_resume_data(SessionResume {
                server_id: "s1".to_string(),
                session_id: "sess-1".to_string(),
                sequence: 42,
                resume_gateway_url: "wss://resume/".to_string(),
            })
            .await;
        assert_eq!(session.session_id().await.as_deref(), Some("sess-1"));
        assert_eq!(session.sequence().await, 42);
        assert_eq!(session.resume_url().await.as_deref(), Some("wss://resume/"));
    }

    #[tokio::test]
    async fn commands_fail_without_a_live_socket() {
        let session = Session::new("s1", "token", "wss://example/", "online", Arc::new(NoopCallbacks));
        assert!(matches!(
            session.send_presence_update("idle").await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            session.send_voice_state_update("g1", "c1", false, false).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn close_before_connect_is_a_noop_transition_to_closed() {
        let session = Session::new("s1", "token", "wss://example/", "online", Arc::new(NoopCallbacks));
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        // idempotent
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn dial_failure_leaves_state_disconnected() {
        let session = Session::new(
            "s1",
            "token",
            "ws://127.0.0.1:1/does-not-exist",
            "online",
            Arc::new(NoopCallbacks),
        );
        let result = session.connect().await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
