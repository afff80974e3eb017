//! Wire opcodes and close-code classification for the gateway protocol.
//!
//! [Discord documentation](https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway-gateway-opcodes)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[repr(u8)]
#[serde(into = "u8", from = "u8")]
#[non_exhaustive]
/// Identifies the kind of event sent and received over the gateway socket.
pub enum OpCode {
    /// **Receive** only. A named event with a sequence number.
    Dispatch = 0,
    /// **Send/Receive.** Periodic ping, or an ad-hoc request for one.
    Heartbeat = 1,
    /// **Send.** Authenticate a fresh session.
    Identify = 2,
    /// **Send.** Change the client's presence.
    PresenceUpdate = 3,
    /// **Send.** Join/leave/move between voice channels.
    VoiceStateUpdate = 4,
    /// **Send.** Re-attach to a prior session.
    Resume = 6,
    /// **Receive.** The server asks for a graceful reconnect.
    Reconnect = 7,
    /// **Receive.** The session was rejected; the payload is a resumable flag.
    InvalidSession = 9,
    /// **Receive.** Carries the heartbeat interval to use, in milliseconds.
    Hello = 10,
    /// **Receive.** Acknowledges a previously sent heartbeat.
    HeartbeatAck = 11,
    /// Any opcode this client does not act on but must still round-trip.
    #[doc(hidden)]
    Unknown = 255,
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        value as u8
    }
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => Self::Unknown,
        }
    }
}

/// Close codes for which reconnection is futile and must not be attempted.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Whether a WebSocket close code is unrecoverable. An unclassified close
/// (no code at all, or a read timeout) is always treated as transient by
/// callers, since they never hand this function a code to begin with.
#[must_use]
pub fn is_fatal_close(code: u16) -> bool {
    FATAL_CLOSE_CODES.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_are_classified_fatal() {
        for code in FATAL_CLOSE_CODES {
            assert!(is_fatal_close(code), "{code} should be fatal");
        }
    }

    #[test]
    fn other_codes_are_transient() {
        for code in [1000, 1001, 1002, 1006, 4000, 4008, 4009] {
            assert!(!is_fatal_close(code), "{code} should be transient");
        }
    }

    #[test]
    fn opcode_roundtrips_through_u8() {
        for op in [
            OpCode::Dispatch,
            OpCode::Heartbeat,
            OpCode::Identify,
            OpCode::PresenceUpdate,
            OpCode::VoiceStateUpdate,
            OpCode::Resume,
            OpCode::Reconnect,
            OpCode::InvalidSession,
            OpCode::Hello,
            OpCode::HeartbeatAck,
        ] {
            let raw: u8 = op.into();
            assert_eq!(OpCode::from(raw), op);
        }
    }

    #[test]
    fn unknown_opcode_value_does_not_panic() {
        assert_eq!(OpCode::from(200), OpCode::Unknown);
    }
}
