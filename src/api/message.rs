//! Transport frames and their opcodes.
//!
//! Frames exist in two framings negotiated at join: a self-describing JSON
//! object form and a fixed-shape opcode-array form. Both ride either a text
//! (UTF-8 JSON) or binary (MessagePack) channel; framing and channel are
//! orthogonal. This module defines the shapes; `api::codec` does the
//! encoding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::{CodecError, ErrorCode};
use crate::api::ident::{ClientId, PlayerId, SessionId};
use crate::state::diff::Patch;

/// Message kind opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Action = 101,
    ActionResponse = 102,
    Event = 103,
    Join = 104,
    JoinResponse = 105,
    Error = 106,
    StateUpdateWithEvents = 107,
}

impl MessageKind {
    pub fn opcode(self) -> i64 {
        self as i64
    }

    pub fn from_opcode(code: i64) -> Option<Self> {
        Some(match code {
            101 => Self::Action,
            102 => Self::ActionResponse,
            103 => Self::Event,
            104 => Self::Join,
            105 => Self::JoinResponse,
            106 => Self::Error,
            107 => Self::StateUpdateWithEvents,
            _ => return None,
        })
    }
}

/// State update kind opcodes. These live below the message-kind range so a
/// bare state-update array is distinguishable by its leading opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateUpdateKind {
    NoChange = 0,
    FirstSync = 1,
    Diff = 2,
}

impl StateUpdateKind {
    pub fn opcode(self) -> i64 {
        self as i64
    }

    pub fn from_opcode(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::NoChange,
            1 => Self::FirstSync,
            2 => Self::Diff,
            _ => return None,
        })
    }
}

/// One replication emission toward a single client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(rename = "type")]
    pub kind: StateUpdateKind,
    pub patches: Vec<Patch>,
}

impl StateUpdate {
    pub fn no_change() -> Self {
        Self {
            kind: StateUpdateKind::NoChange,
            patches: Vec::new(),
        }
    }
}

/// Direction discriminant carried by event frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventDirection {
    FromClient = 0,
    FromServer = 1,
}

impl EventDirection {
    pub fn opcode(self) -> i64 {
        self as i64
    }

    pub fn from_opcode(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::FromClient,
            1 => Self::FromServer,
            _ => return None,
        })
    }
}

/// Fan-out target of a server-emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum EventTarget {
    All,
    Player(PlayerId),
    Client(ClientId),
    Session(SessionId),
    List(Vec<PlayerId>),
}

/// Framing negotiated at join and echoed in the join response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireEncoding {
    JsonObject,
    OpcodeArray,
}

impl WireEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JsonObject => "jsonObject",
            Self::OpcodeArray => "opcodeArray",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "jsonObject" => Self::JsonObject,
            "opcodeArray" => Self::OpcodeArray,
            _ => return None,
        })
    }
}

/// An action payload: a type identifier plus base64-wrapped JSON or raw
/// bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// Base64 of UTF-8 JSON text.
    Base64Json(String),
    /// Raw serialized bytes, passed through untouched.
    Raw(Vec<u8>),
}

impl ActionPayload {
    pub fn from_value(value: &Value) -> Self {
        Self::Base64Json(BASE64.encode(value.to_string().as_bytes()))
    }

    /// Decode into a canonical value.
    pub fn decode(&self) -> Result<Value, CodecError> {
        let bytes = match self {
            Self::Base64Json(text) => BASE64
                .decode(text)
                .map_err(|e| CodecError::Malformed(format!("payload base64: {e}")))?,
            Self::Raw(bytes) => bytes.clone(),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| CodecError::Malformed(format!("payload json: {e}")))
    }
}

/// A typed action dispatch envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEnvelope {
    pub type_identifier: String,
    pub payload: ActionPayload,
}

impl ActionEnvelope {
    pub fn new(type_identifier: impl Into<String>, payload: &Value) -> Self {
        Self {
            type_identifier: type_identifier.into(),
            payload: ActionPayload::from_value(payload),
        }
    }
}

/// A server or client event as it crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub direction: EventDirection,
    pub name: String,
    pub payload: Value,
}

/// Name of the built-in replay verification event. Recognized without any
/// land schema; field order for the array payload form is fixed.
pub const REPLAY_TICK_EVENT: &str = "ReplayTick";

/// Declared field order of `ReplayTick`.
pub const REPLAY_TICK_FIELDS: [&str; 4] = ["tickId", "isMatch", "expectedHash", "actualHash"];

/// Per-tick replay verification report, emitted by the re-evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayTick {
    pub tick_id: i64,
    pub is_match: bool,
    pub expected_hash: String,
    pub actual_hash: String,
}

/// Transport frames.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Join {
        request_id: String,
        land_type: String,
        land_instance_id: Option<String>,
        options: Option<Value>,
        encoding: Option<WireEncoding>,
    },
    JoinResponse {
        request_id: String,
        success: bool,
        land_type: Option<String>,
        land_instance_id: Option<String>,
        land_id: Option<String>,
        player_slot: Option<String>,
        encoding: Option<WireEncoding>,
        reason: Option<String>,
    },
    Action {
        request_id: String,
        envelope: ActionEnvelope,
    },
    ActionResponse {
        request_id: String,
        payload: Option<Value>,
    },
    Event(EventMessage),
    Error {
        request_id: Option<String>,
        code: ErrorCode,
        message: String,
    },
    /// A bare replication frame.
    StateUpdate(StateUpdate),
    /// A sync flush and its pending server events in one transport message.
    StateUpdateWithEvents {
        update: StateUpdate,
        events: Vec<EventMessage>,
    },
}

impl Frame {
    /// The originating request id, when the frame answers a request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Join { request_id, .. }
            | Self::JoinResponse { request_id, .. }
            | Self::Action { request_id, .. }
            | Self::ActionResponse { request_id, .. } => Some(request_id),
            Self::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opcode_round_trips() {
        for kind in [
            MessageKind::Action,
            MessageKind::ActionResponse,
            MessageKind::Event,
            MessageKind::Join,
            MessageKind::JoinResponse,
            MessageKind::Error,
            MessageKind::StateUpdateWithEvents,
        ] {
            assert_eq!(MessageKind::from_opcode(kind.opcode()), Some(kind));
        }
        for kind in [
            StateUpdateKind::NoChange,
            StateUpdateKind::FirstSync,
            StateUpdateKind::Diff,
        ] {
            assert_eq!(StateUpdateKind::from_opcode(kind.opcode()), Some(kind));
        }
        for dir in [EventDirection::FromClient, EventDirection::FromServer] {
            assert_eq!(EventDirection::from_opcode(dir.opcode()), Some(dir));
        }
        assert_eq!(MessageKind::from_opcode(99), None);
    }

    #[test]
    fn action_payload_base64_round_trip() {
        let value = json!({"dx": 1500, "dy": -250});
        let payload = ActionPayload::from_value(&value);
        assert_eq!(payload.decode().unwrap(), value);
    }

    #[test]
    fn action_payload_raw_bytes() {
        let payload = ActionPayload::Raw(br#"{"hp": 10}"#.to_vec());
        assert_eq!(payload.decode().unwrap(), json!({"hp": 10}));
    }

    #[test]
    fn invalid_base64_is_decode_error() {
        let payload = ActionPayload::Base64Json("!!!".to_string());
        assert!(payload.decode().is_err());
    }
}
