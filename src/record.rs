// Deterministic recording.
//
// Every handler invocation is appended to the current tick frame together
// with its resolver outputs, so a record file replays to a bit-identical
// timeline without performing any live I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::api::ident::{ClientId, PlayerId, SessionId};
use crate::api::message::EventTarget;

pub mod export;
pub mod recorder;
#[cfg(feature = "server")]
pub mod reevaluate;

/// What produced a recorded input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Action,
    ClientEvent,
    Lifecycle,
}

/// A single resolver's captured output: the resolver's type id plus the
/// value it produced at live time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverOutput {
    pub type_id: String,
    pub value: Value,
}

/// One recorded handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedInput {
    pub kind: InputKind,
    /// Monotone within the tick frame; preserves intra-tick order.
    pub sequence: u64,
    pub type_identifier: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolver_outputs: BTreeMap<String, ResolverOutput>,
    /// The committed tick the handler observed when it ran.
    pub resolved_at_tick: i64,
}

/// A server-emitted event captured in the frame that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedServerEvent {
    pub sequence: u64,
    pub name: String,
    pub payload: Value,
    pub target: EventTarget,
}

/// All inputs and emissions of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickFrame {
    pub tick_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RecordedInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client_events: Vec<RecordedInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifecycle_events: Vec<RecordedInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_events: Vec<RecordedServerEvent>,
}

impl TickFrame {
    pub fn empty(tick_id: i64) -> Self {
        Self {
            tick_id,
            state_hash: None,
            actions: Vec::new(),
            client_events: Vec::new(),
            lifecycle_events: Vec::new(),
            server_events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
            && self.client_events.is_empty()
            && self.lifecycle_events.is_empty()
            && self.server_events.is_empty()
    }

    /// Actions and client events merged back into arrival order.
    pub fn inputs_in_sequence(&self) -> Vec<&RecordedInput> {
        let mut inputs: Vec<&RecordedInput> =
            self.actions.iter().chain(&self.client_events).collect();
        inputs.sort_by_key(|i| i.sequence);
        inputs
    }
}

/// Record provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub land_id: String,
    pub land_type: String,
    /// ISO-8601. Carried verbatim through re-evaluation, never re-stamped.
    pub created_at: String,
    pub rng_seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_state_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Informational only; hashes must agree across hardware.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_fingerprint: Option<String>,
}

/// A complete persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFile {
    pub record_metadata: RecordMetadata,
    pub tick_frames: Vec<TickFrame>,
}

impl RecordFile {
    /// Highest recorded tick, `-1` for an empty record.
    pub fn max_tick_id(&self) -> i64 {
        self.tick_frames.iter().map(|f| f.tick_id).max().unwrap_or(-1)
    }

    pub fn frame(&self, tick_id: i64) -> Option<&TickFrame> {
        self.tick_frames.iter().find(|f| f.tick_id == tick_id)
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        serde_json::to_string(self).map_err(|e| RecordError::Serialize(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, RecordError> {
        let mut file: Self =
            serde_json::from_str(raw).map_err(|e| RecordError::Parse(e.to_string()))?;
        file.tick_frames.sort_by_key(|f| f.tick_id);
        Ok(file)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record serialization failed: {0}")]
    Serialize(String),
    #[error("record parse failed: {0}")]
    Parse(String),
    #[error("record is for land type `{recorded}`, definition is `{expected}`")]
    LandTypeMismatch { recorded: String, expected: String },
    #[error("record export failed: {0}")]
    Export(String),
}
