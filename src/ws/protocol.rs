//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::game::TankId;

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving a topic
    Subscribe { channel: String },

    /// Stop receiving a topic
    Unsubscribe { channel: String },

    /// Request addressed to a destination
    Send {
        channel: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Client-to-server request channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Find or create an open session
    Create,
    /// Take a seat in a session
    Join(Uuid),
    /// Latest key/mouse state for a seated tank
    Input(Uuid, TankId),
    /// Give up a seat
    Leave(Uuid, TankId),
    /// Start a WAITING session now
    Start(Uuid),
}

impl Destination {
    pub fn parse(channel: &str) -> Result<Self, ProtocolError> {
        let unknown = || ProtocolError::UnknownChannel(channel.to_string());
        let id = |s: &str| Uuid::parse_str(s).map_err(|_| unknown());

        let parts: Vec<&str> = channel.trim_start_matches('/').split('/').collect();
        match parts.as_slice() {
            ["create"] => Ok(Destination::Create),
            ["join", session] => Ok(Destination::Join(id(*session)?)),
            ["input", session, tank] => Ok(Destination::Input(id(*session)?, id(*tank)?)),
            ["leave", session, tank] => Ok(Destination::Leave(id(*session)?, id(*tank)?)),
            ["start", session] => Ok(Destination::Start(id(*session)?)),
            _ => Err(unknown()),
        }
    }
}

/// Payload of `join/{sessionId}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinPayload {
    pub player_name: Option<String>,
    /// Stable identity that keys progression
    pub player_id: Option<String>,
    /// Echoed back on `joined/{sessionId}`
    pub correlation_id: Option<String>,
}

/// Payload of the `error` channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Too many requests")]
    RateLimited,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed_frame",
            ProtocolError::UnknownChannel(_) => "unknown_channel",
            ProtocolError::InvalidPayload(_) => "invalid_payload",
            ProtocolError::RateLimited => "rate_limited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frames() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","channel":"lobby"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                channel: "lobby".to_string()
            }
        );

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"send","channel":"create"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Send {
                channel: "create".to_string(),
                payload: Value::Null
            }
        );
    }

    #[test]
    fn test_destinations() {
        let sid = Uuid::new_v4();
        let tid = Uuid::new_v4();
        assert_eq!(Destination::parse("create").unwrap(), Destination::Create);
        assert_eq!(
            Destination::parse(&format!("join/{sid}")).unwrap(),
            Destination::Join(sid)
        );
        assert_eq!(
            Destination::parse(&format!("/input/{sid}/{tid}")).unwrap(),
            Destination::Input(sid, tid)
        );
        assert_eq!(
            Destination::parse(&format!("leave/{sid}/{tid}")).unwrap(),
            Destination::Leave(sid, tid)
        );
        assert!(matches!(
            Destination::parse("join/not-a-uuid"),
            Err(ProtocolError::UnknownChannel(_))
        ));
        assert!(Destination::parse(&format!("start/{sid}/extra")).is_err());
    }

    #[test]
    fn test_join_payload_fields_are_optional() {
        let payload: JoinPayload =
            serde_json::from_value(json!({"playerName": "Ann", "correlationId": "c1"})).unwrap();
        assert_eq!(payload.player_name.as_deref(), Some("Ann"));
        assert_eq!(payload.player_id, None);
        assert_eq!(payload.correlation_id.as_deref(), Some("c1"));
    }
}
