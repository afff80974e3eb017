//! Thin transport layer over `tokio-tungstenite`: dial, encode/decode JSON
//! text frames, and close with an explicit code.
//!
//! The stream is split into a [`WebsocketWriter`] and [`WebsocketReader`] so
//! the session's read loop and heartbeat loop (two independent tasks, per
//! the concurrency model) can each own the half they need without sharing a
//! lock across a network write.

use std::time::Duration;

use futures::stream::{FusedStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
    tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};

use super::error::{Error, Result};
use super::frame::GatewayMessage;

/// Read timeout per frame; bounds liveness detection and orderly shutdown.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Large enough for the initial `READY` payload.
const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `url`, returning a transient [`Error::DialFailed`] on any
/// TCP/TLS/handshake failure.
pub async fn connect(url: &str) -> Result<(WebsocketWriter, WebsocketReader)> {
    let config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..WebSocketConfig::default()
    };

    let (stream, _) = connect_async_with_config(url, Some(config), false)
        .await
        .map_err(|e| Error::DialFailed(e.to_string()))?;

    let (sink, source) = stream.split();
    Ok((WebsocketWriter(sink), WebsocketReader(source)))
}

pub struct WebsocketWriter(SplitSink<Stream, Message>);

impl std::fmt::Debug for WebsocketWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketWriter").finish_non_exhaustive()
    }
}

impl WebsocketWriter {
    /// Sends a pre-built JSON frame as a text message.
    pub async fn send(&mut self, payload: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(payload)?;
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Closes the underlying socket with an explicit code and reason.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let _ = self
            .0
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            })))
            .await;
        let _ = self.0.close().await;
        Ok(())
    }
}

pub struct WebsocketReader(SplitStream<Stream>);

impl std::fmt::Debug for WebsocketReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketReader").finish_non_exhaustive()
    }
}

impl WebsocketReader {
    /// Waits up to [`READ_TIMEOUT`] for the next text/binary frame.
    ///
    /// Returns `Ok(None)` on a read timeout (the caller's heartbeat/liveness
    /// logic drives the next action) and an error on a closed or broken
    /// socket. Ping/Pong frames are skipped (tungstenite answers pings
    /// transparently); unsupported frame kinds are skipped.
    pub async fn receive(&mut self) -> Result<Option<GatewayMessage>> {
        loop {
            if self.0.is_terminated() {
                return Err(Error::TransientClose {
                    code: None,
                    reason: "stream already terminated".to_string(),
                });
            }

            let next = match timeout(READ_TIMEOUT, self.0.next()).await {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => {
                    return Err(Error::TransientClose {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
                Err(_) => return Ok(None),
            };

            match next {
                Message::Text(text) => return Ok(Some(GatewayMessage::parse(&text)?)),
                Message::Binary(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    return Ok(Some(GatewayMessage::parse(&text)?));
                }
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.to_string())
                    });
                    return match code {
                        Some(c) if crate::gateway::opcodes::is_fatal_close(c) => {
                            Err(Error::FatalClose { code: c, reason })
                        }
                        _ => Err(Error::TransientClose { code, reason }),
                    };
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
