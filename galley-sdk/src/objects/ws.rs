//! WebSocket message types for the tenant event stream.
//!
//! The `GET /events` endpoint upgrades to a WebSocket connection scoped to
//! the caller's tenant.
//!
//! # Protocol
//!
//! 1. If the client passed `?last_seen={n}`, the server first replays every
//!    retained event with a sequence above `n` followed by
//!    [`WsServerMessage::ReplayComplete`], or sends
//!    [`WsServerMessage::ResyncRequired`] when the retained buffer no longer
//!    covers the requested range. The client must then fetch full state.
//! 2. Live [`WsServerMessage::Event`] frames follow.
//! 3. A [`WsServerMessage::Gap`] means the client consumed too slowly and
//!    the server dropped buffered events; it must resync.
//! 4. The server sends [`WsServerMessage::Ping`] on its keep-alive interval;
//!    clients answer with [`WsClientMessage::Pong`] and acknowledge
//!    processed events with [`WsClientMessage::Ack`].

use serde::{Deserialize, Serialize};

use super::events::EventEnvelope;

/// Server-to-client WebSocket message, internally tagged on `"type"`:
///
/// ```json
/// {"type":"event","event":{ ... }}
/// {"type":"resync_required","latest_sequence":42}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    Event { event: EventEnvelope },
    ReplayComplete { latest_sequence: u64 },
    ResyncRequired { latest_sequence: u64 },
    Gap { latest_sequence: u64 },
    Ping,
    Error { code: u16, reason: String },
}

/// Client-to-server WebSocket message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    Ack { sequence: u64 },
    Pong,
}

/// Well-known WebSocket close codes used by the event stream.
///
/// Codes in the 4000-4999 range are reserved for application use by
/// [RFC 6455 §7.4.2](https://www.rfc-editor.org/rfc/rfc6455#section-7.4.2).
pub struct WsCloseCode;

impl WsCloseCode {
    pub const NORMAL: u16 = 1000;
    pub const INTERNAL_ERROR: u16 = 1011;
    /// No identity, or one that cannot subscribe at all.
    pub const UNAUTHORIZED: u16 = 4001;
    /// The authenticated identity belongs to a different tenant.
    pub const TENANT_MISMATCH: u16 = 4003;
    /// The subscription was evicted after missing keep-alives.
    pub const IDLE_TIMEOUT: u16 = 4008;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_are_tagged() {
        let ack: WsClientMessage = serde_json::from_str(r#"{"type":"ack","sequence":7}"#).unwrap();
        assert_eq!(ack, WsClientMessage::Ack { sequence: 7 });
        let pong: WsClientMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(pong, WsClientMessage::Pong);
    }

    #[test]
    fn test_resync_frame_shape() {
        let json =
            serde_json::to_value(WsServerMessage::ResyncRequired { latest_sequence: 42 }).unwrap();
        assert_eq!(json["type"], "resync_required");
        assert_eq!(json["latest_sequence"], 42);
    }
}
