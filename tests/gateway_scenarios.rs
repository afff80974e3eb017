//! End-to-end scenarios driving a real [`Session`] against a minimal
//! in-process mock gateway server, grounded in the same `accept_async`
//! server-side pattern the pack's mock-gateway example uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use gatewarden::gateway::error::Error as GatewayError;
use gatewarden::gateway::session::{Session, SessionCallbacks};
use gatewarden::model::SessionState;

#[derive(Debug, Clone)]
enum Event {
    Ready(String),
    StateChange(SessionState),
    Disconnect(Option<u16>, String),
    Error(String),
}

struct RecordingCallbacks {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl SessionCallbacks for RecordingCallbacks {
    async fn on_ready(&self, _server_id: &str, session_id: &str) {
        let _ = self.tx.send(Event::Ready(session_id.to_string()));
    }

    async fn on_state_change(&self, _server_id: &str, state: SessionState) {
        let _ = self.tx.send(Event::StateChange(state));
    }

    async fn on_disconnect(&self, _server_id: &str, code: Option<u16>, reason: &str) {
        let _ = self.tx.send(Event::Disconnect(code, reason.to_string()));
    }

    async fn on_error(&self, _server_id: &str, error: &GatewayError) {
        let _ = self.tx.send(Event::Error(error.to_string()));
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}/"))
}

async fn accept(listener: TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Reads frames until the peer sends (or we send) a close, answering any
/// close with a close of our own so the handshake completes instead of
/// hanging the test on a half-open socket.
async fn drain_until_closed(mut ws: WebSocketStream<tokio::net::TcpStream>) {
    while let Some(Ok(message)) = ws.next().await {
        if matches!(message, Message::Close(_)) {
            let _ = ws.close(None).await;
            break;
        }
    }
}

async fn send_hello(ws: &mut WebSocketStream<tokio::net::TcpStream>, heartbeat_interval_ms: u64) {
    ws.send(Message::Text(format!(
        r#"{{"op":10,"d":{{"heartbeat_interval":{heartbeat_interval_ms}}}}}"#
    )))
    .await
    .unwrap();
}

async fn await_any_client_frame(ws: &mut WebSocketStream<tokio::net::TcpStream>) {
    let _ = ws.next().await;
}

async fn send_ready(ws: &mut WebSocketStream<tokio::net::TcpStream>, session_id: &str) {
    ws.send(Message::Text(format!(
        r#"{{"op":0,"t":"READY","s":1,"d":{{"v":10,"session_id":"{session_id}","resume_gateway_url":"wss://mock/"}}}}"#
    )))
    .await
    .unwrap();
}

async fn recv_event(rx: &mut mpsc::UnboundedReceiver<Event>, timeout: Duration) -> Option<Event> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

fn session_with_recorder(url: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new("s1", "test-token", url.to_string(), "online", Arc::new(RecordingCallbacks { tx }));
    (session, rx)
}

#[tokio::test]
async fn s1_fresh_connect_reaches_connected_and_fires_ready() {
    let _ = dotenvy::dotenv();
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(listener).await;
        send_hello(&mut ws, 100).await;
        await_any_client_frame(&mut ws).await; // identify
        send_ready(&mut ws, "sess-1").await;
        drain_until_closed(ws).await;
    });

    let (session, mut rx) = session_with_recorder(&url);
    session.connect().await.unwrap();

    let mut saw_ready = false;
    let mut saw_connected = false;
    for _ in 0..8 {
        match recv_event(&mut rx, Duration::from_secs(2)).await {
            Some(Event::Ready(sid)) => {
                assert_eq!(sid, "sess-1");
                saw_ready = true;
            }
            Some(Event::StateChange(SessionState::Connected)) => saw_connected = true,
            Some(_) => {}
            None => break,
        }
        if saw_ready && saw_connected {
            break;
        }
    }

    assert!(saw_ready, "expected OnReady to fire");
    assert!(saw_connected, "expected a transition to Connected");
    assert_eq!(session.state(), SessionState::Connected);
    session.close().await;
}

#[tokio::test]
async fn s2_heartbeats_are_answered_and_session_stays_connected() {
    let _ = dotenvy::dotenv();
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(listener).await;
        send_hello(&mut ws, 80).await;
        await_any_client_frame(&mut ws).await; // identify
        send_ready(&mut ws, "sess-1").await;

        // Ack every heartbeat we see for a few cycles.
        for _ in 0..4 {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                if text.contains("\"op\":1") {
                    ws.send(Message::Text(r#"{"op":11}"#.to_string())).await.unwrap();
                }
            }
        }
        drain_until_closed(ws).await;
    });

    let (session, mut rx) = session_with_recorder(&url);
    session.connect().await.unwrap();

    // Drain until Connected.
    loop {
        match recv_event(&mut rx, Duration::from_secs(2)).await {
            Some(Event::StateChange(SessionState::Connected)) => break,
            Some(_) => {}
            None => panic!("never reached Connected"),
        }
    }

    // Survive several heartbeat intervals without being kicked into Disconnected.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(session.state(), SessionState::Connected);
    session.close().await;
}

#[tokio::test]
async fn s3_server_reconnect_request_disconnects_with_code_zero() {
    let _ = dotenvy::dotenv();
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(listener).await;
        send_hello(&mut ws, 100).await;
        await_any_client_frame(&mut ws).await; // identify
        send_ready(&mut ws, "sess-1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        ws.send(Message::Text(r#"{"op":7}"#.to_string())).await.unwrap();
        drain_until_closed(ws).await;
    });

    let (session, mut rx) = session_with_recorder(&url);
    session.connect().await.unwrap();

    let mut saw_reconnect_disconnect = false;
    for _ in 0..8 {
        match recv_event(&mut rx, Duration::from_secs(2)).await {
            Some(Event::Disconnect(Some(0), reason)) => {
                assert_eq!(reason, "reconnect requested");
                saw_reconnect_disconnect = true;
                break;
            }
            Some(_) => {}
            None => break,
        }
    }

    assert!(saw_reconnect_disconnect);
    session.close().await;
}

#[tokio::test]
async fn s4_non_resumable_invalid_session_clears_resume_state() {
    let _ = dotenvy::dotenv();
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(listener).await;
        send_hello(&mut ws, 100).await;
        await_any_client_frame(&mut ws).await; // identify
        send_ready(&mut ws, "sess-1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        ws.send(Message::Text(r#"{"op":9,"d":false}"#.to_string())).await.unwrap();
        drain_until_closed(ws).await;
    });

    let (session, mut rx) = session_with_recorder(&url);
    session.connect().await.unwrap();

    let mut saw_invalid_session_error = false;
    for _ in 0..10 {
        match recv_event(&mut rx, Duration::from_secs(2)).await {
            Some(Event::Error(message)) if message.contains("not resumable") => {
                saw_invalid_session_error = true;
                break;
            }
            Some(_) => {}
            None => break,
        }
    }

    assert!(saw_invalid_session_error);
    // Give the close + read-loop teardown a moment to land.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.session_id().await, None);
    assert_eq!(session.sequence().await, 0);
    assert_eq!(session.resume_url().await, None);
    session.close().await;
}

#[tokio::test]
async fn s5_fatal_close_surfaces_as_error_with_no_retry_signal() {
    let _ = dotenvy::dotenv();
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept(listener).await;
        send_hello(&mut ws, 100).await;
        await_any_client_frame(&mut ws).await; // identify
        send_ready(&mut ws, "sess-1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = ws
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(4013),
                reason: "disallowed intents".into(),
            })))
            .await;
        let _ = ws.close(None).await;
    });

    let (session, mut rx) = session_with_recorder(&url);
    session.connect().await.unwrap();

    let mut saw_fatal_error = false;
    for _ in 0..10 {
        match recv_event(&mut rx, Duration::from_secs(2)).await {
            Some(Event::Error(message)) if message.contains("fatal close") => {
                saw_fatal_error = true;
                break;
            }
            Some(_) => {}
            None => break,
        }
    }

    assert!(saw_fatal_error);
    session.close().await;
}

#[tokio::test]
async fn s6_missed_heartbeat_ack_closes_within_two_intervals() {
    let _ = dotenvy::dotenv();
    let (listener, url) = bind().await;
    const INTERVAL_MS: u64 = 60;
    tokio::spawn(async move {
        let mut ws = accept(listener).await;
        send_hello(&mut ws, INTERVAL_MS).await;
        await_any_client_frame(&mut ws).await; // identify
        send_ready(&mut ws, "sess-1").await;
        // Never ack any heartbeat; just drain until the client closes on us.
        drain_until_closed(ws).await;
    });

    let (session, mut rx) = session_with_recorder(&url);
    session.connect().await.unwrap();

    loop {
        match recv_event(&mut rx, Duration::from_secs(2)).await {
            Some(Event::StateChange(SessionState::Connected)) => break,
            Some(_) => {}
            None => panic!("never reached Connected"),
        }
    }

    let deadline = Duration::from_millis(2 * INTERVAL_MS + 500);
    let mut disconnected = false;
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        match recv_event(&mut rx, Duration::from_millis(100)).await {
            Some(Event::Disconnect(..)) => {
                disconnected = true;
                break;
            }
            _ if session.state() == SessionState::Disconnected => {
                disconnected = true;
                break;
            }
            _ => {}
        }
    }

    assert!(disconnected, "session should self-close after missed acks");
}
