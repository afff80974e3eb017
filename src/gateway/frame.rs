//! Wire envelope and payload schemas exchanged with the gateway.
//!
//! Kept dependency-free of the socket layer (pure serde types) so it can be
//! unit-tested without ever opening a connection, mirroring the split the
//! teacher library draws between `model::gateway` and `gateway::websocket`.

use serde::{Deserialize, Serialize};

use super::opcodes::OpCode;
use super::properties::ClientProperties;

/// A dispatch event name this client acts on specially. Every other dispatch
/// is tracked for its sequence number but otherwise ignored at this layer.
pub const EVENT_READY: &str = "READY";
pub const EVENT_RESUMED: &str = "RESUMED";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
/// The `d` payload of a `READY` dispatch, trimmed to the fields this client
/// acts on. Extra fields present on the wire are ignored by serde.
pub struct ReadyData {
    pub v: u16,
    pub session_id: String,
    pub resume_gateway_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

/// An event received from the gateway, after the envelope fields have been
/// peeled apart from the inner dispatch/hello/invalid-session payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMessage {
    pub op: OpCode,
    /// Present only on dispatch frames.
    pub sequence: Option<u64>,
    /// Present only on dispatch frames; the event name (`"READY"`, ...).
    pub event_type: Option<String>,
    /// The raw `d` payload, left for the caller to interpret based on `op`.
    pub data: Option<serde_json::Value>,
}

impl GatewayMessage {
    /// Parses a raw gateway text frame into its envelope fields.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if `text` is not a JSON object with an
    /// integer `op` field.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let op_raw = map
            .remove("op")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| serde::de::Error::missing_field("op"))?;
        let sequence = map.remove("s").and_then(|v| v.as_u64());
        let event_type = map
            .remove("t")
            .and_then(|v| v.as_str().map(std::string::ToString::to_string));
        let data = map.remove("d");

        Ok(Self {
            op: OpCode::from(op_raw as u8),
            sequence,
            event_type,
            data,
        })
    }

    /// Returns the boolean payload of an `InvalidSession` frame.
    #[must_use]
    pub fn invalid_session_resumable(&self) -> bool {
        self.data.as_ref().and_then(serde_json::Value::as_bool).unwrap_or(false)
    }

    /// Parses the `d` payload of a `Hello` frame.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if `d` is missing or malformed.
    pub fn hello(&self) -> Result<HelloData, serde_json::Error> {
        let data = self.data.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data)
    }

    /// Parses the `d` payload of a `READY` dispatch.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if `d` is missing or malformed.
    pub fn ready(&self) -> Result<ReadyData, serde_json::Error> {
        let data = self.data.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(data)
    }
}

#[derive(Debug, Clone, Serialize)]
struct Envelope<D> {
    op: OpCode,
    d: D,
}

#[derive(Debug, Clone, Serialize)]
pub struct Presence {
    pub since: Option<u64>,
    pub activities: Vec<serde_json::Value>,
    pub status: String,
    pub afk: bool,
}

impl Presence {
    /// Presence as sent with `PresenceUpdate`: `since` is `null` while the
    /// client isn't reporting an away-since timestamp.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }

    /// Presence as sent with `Identify`: `since` is always the literal `0`,
    /// distinct from `PresenceUpdate`'s `null`.
    #[must_use]
    pub fn new_for_identify(status: impl Into<String>) -> Self {
        Self {
            since: Some(0),
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    properties: ClientProperties,
    presence: Presence,
    compress: bool,
}

/// Builds the `Identify` (op 2) frame.
#[must_use]
pub fn identify_frame(token: &str, properties: ClientProperties, status: &str) -> serde_json::Value {
    serde_json::json!(Envelope {
        op: OpCode::Identify,
        d: IdentifyData {
            token,
            properties,
            presence: Presence::new_for_identify(status),
            compress: false,
        },
    })
}

#[derive(Debug, Clone, Serialize)]
struct ResumeData<'a> {
    token: &'a str,
    session_id: &'a str,
    seq: u64,
}

/// Builds the `Resume` (op 6) frame.
#[must_use]
pub fn resume_frame(token: &str, session_id: &str, sequence: u64) -> serde_json::Value {
    serde_json::json!(Envelope {
        op: OpCode::Resume,
        d: ResumeData {
            token,
            session_id,
            seq: sequence,
        },
    })
}

/// Builds the `Heartbeat` (op 1) frame.
#[must_use]
pub fn heartbeat_frame(last_sequence: Option<u64>) -> serde_json::Value {
    serde_json::json!(Envelope {
        op: OpCode::Heartbeat,
        d: last_sequence,
    })
}

#[derive(Debug, Clone, Serialize)]
struct PresenceUpdateData {
    since: Option<u64>,
    activities: Vec<serde_json::Value>,
    status: String,
    afk: bool,
}

/// Builds the `PresenceUpdate` (op 3) frame.
#[must_use]
pub fn presence_update_frame(status: &str) -> serde_json::Value {
    serde_json::json!(Envelope {
        op: OpCode::PresenceUpdate,
        d: PresenceUpdateData {
            since: None,
            activities: Vec::new(),
            status: status.to_string(),
            afk: false,
        },
    })
}

#[derive(Debug, Clone, Serialize)]
struct VoiceStateUpdateData<'a> {
    guild_id: &'a str,
    channel_id: Option<&'a str>,
    self_mute: bool,
    self_deaf: bool,
}

/// Builds the `VoiceStateUpdate` (op 4) frame. `channel_id` empty means
/// "leave the channel" and is serialized as JSON `null`.
#[must_use]
pub fn voice_state_update_frame(
    guild_id: &str,
    channel_id: &str,
    self_mute: bool,
    self_deaf: bool,
) -> serde_json::Value {
    let channel_id = if channel_id.is_empty() {
        None
    } else {
        Some(channel_id)
    };
    serde_json::json!(Envelope {
        op: OpCode::VoiceStateUpdate,
        d: VoiceStateUpdateData {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::properties::ClientProperties;

    #[test]
    fn parse_extracts_envelope_fields() {
        let msg = GatewayMessage::parse(
            r#"{"op":0,"t":"READY","s":1,"d":{"v":10,"session_id":"sess-1","resume_gateway_url":"wss://mock/"}}"#,
        )
        .unwrap();
        assert_eq!(msg.op, OpCode::Dispatch);
        assert_eq!(msg.sequence, Some(1));
        assert_eq!(msg.event_type.as_deref(), Some("READY"));
        let ready = msg.ready().unwrap();
        assert_eq!(ready.session_id, "sess-1");
        assert_eq!(ready.resume_gateway_url, "wss://mock/");
    }

    #[test]
    fn parse_hello_extracts_interval() {
        let msg = GatewayMessage::parse(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(msg.hello().unwrap().heartbeat_interval, 41250);
    }

    #[test]
    fn parse_invalid_session_boolean() {
        let msg = GatewayMessage::parse(r#"{"op":9,"d":false}"#).unwrap();
        assert!(!msg.invalid_session_resumable());
        let msg = GatewayMessage::parse(r#"{"op":9,"d":true}"#).unwrap();
        assert!(msg.invalid_session_resumable());
    }

    #[test]
    fn identify_frame_has_no_session_fields() {
        let props = ClientProperties {
            os: "linux".to_string(),
            browser: "gatewarden".to_string(),
            device: String::new(),
        };
        let frame = identify_frame("token", props, "online");
        assert_eq!(frame["op"], 2);
        assert_eq!(frame["d"]["token"], "token");
        assert_eq!(frame["d"]["compress"], false);
        assert_eq!(frame["d"]["presence"]["status"], "online");
        assert_eq!(frame["d"]["presence"]["since"], 0);
    }

    #[test]
    fn voice_state_update_serializes_empty_channel_as_null() {
        let frame = voice_state_update_frame("g1", "", false, false);
        assert!(frame["d"]["channel_id"].is_null());
        let frame = voice_state_update_frame("g1", "c1", true, false);
        assert_eq!(frame["d"]["channel_id"], "c1");
    }

    #[test]
    fn heartbeat_frame_carries_last_sequence_or_null() {
        assert_eq!(heartbeat_frame(Some(7))["d"], 7);
        assert!(heartbeat_frame(None)["d"].is_null());
    }
}
