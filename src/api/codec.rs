//! Frame encoding and decoding.
//!
//! Two framings over one canonical value model:
//!
//! - JSON object form: self-describing objects, `{kind, …}` for transport
//!   messages, `{type, patches}` for state updates, `{values}` for bare
//!   snapshots.
//! - Opcode array form: fixed-shape arrays led by a numeric opcode. State
//!   updates use the low opcodes 0..=2, transport messages 101..=107, so the
//!   leading element alone dispatches.
//!
//! Either framing serializes through a channel [`Schema`](crate::api::schema)
//! (JSON text or MessagePack binary). Patch compression and field-ordered
//! event payloads exist only in the array form; the object form stays fully
//! self-describing.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::api::compress::{PathTable, SlotTable, compress_patch, expand_patch};
use crate::api::error::{CodecError, ErrorCode};
use crate::api::message::{
    ActionEnvelope, ActionPayload, EventDirection, EventMessage, Frame, MessageKind,
    REPLAY_TICK_EVENT, REPLAY_TICK_FIELDS, StateUpdate, StateUpdateKind, WireEncoding,
};
use crate::state::diff::Patch;

/// Declared field order per event name, for the array payload form.
#[derive(Debug, Clone)]
pub struct EventSchemaTable {
    fields: HashMap<String, Vec<String>>,
}

impl Default for EventSchemaTable {
    fn default() -> Self {
        let mut table = Self {
            fields: HashMap::new(),
        };
        // Built-in system events decode without any land schema.
        table.register(
            REPLAY_TICK_EVENT,
            REPLAY_TICK_FIELDS.iter().map(|s| (*s).to_string()),
        );
        table
    }
}

impl EventSchemaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I>(&mut self, name: &str, fields: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.fields
            .insert(name.to_string(), fields.into_iter().collect());
    }

    pub fn field_order(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Object payload to field-ordered array. `None` when the event has no
    /// declared order or the payload is not an object.
    pub fn to_array(&self, name: &str, payload: &Value) -> Option<Value> {
        let order = self.fields.get(name)?;
        let obj = payload.as_object()?;
        Some(Value::Array(
            order
                .iter()
                .map(|f| obj.get(f).cloned().unwrap_or(Value::Null))
                .collect(),
        ))
    }

    /// Field-ordered array back to the object payload.
    pub fn from_array(&self, name: &str, items: &[Value]) -> Result<Value, CodecError> {
        let order = self
            .fields
            .get(name)
            .ok_or_else(|| CodecError::UnknownEventShape(name.to_string()))?;
        let mut obj = Map::new();
        for (field, value) in order.iter().zip(items) {
            obj.insert(field.clone(), value.clone());
        }
        Ok(Value::Object(obj))
    }
}

/// Stateless framing codec. Per-connection state (the slot dictionary) is
/// passed in by the caller, since it outlives individual frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    pub encoding: WireEncoding,
}

impl FrameCodec {
    pub fn new(encoding: WireEncoding) -> Self {
        Self { encoding }
    }

    pub fn encode(
        &self,
        frame: &Frame,
        paths: Option<&PathTable>,
        mut slots: Option<&mut SlotTable>,
        events: Option<&EventSchemaTable>,
    ) -> Value {
        match self.encoding {
            WireEncoding::JsonObject => encode_object(frame),
            WireEncoding::OpcodeArray => encode_array(frame, paths, slots.as_deref_mut(), events),
        }
    }

    pub fn decode(
        &self,
        value: &Value,
        paths: &PathTable,
        slots: &mut SlotTable,
        events: Option<&EventSchemaTable>,
    ) -> Result<Frame, CodecError> {
        match value {
            Value::Array(items) => decode_array(items, paths, slots, events),
            Value::Object(map) => decode_object(map),
            _ => Err(CodecError::Malformed("frame root".to_string())),
        }
    }
}

// ---- JSON object form ----

fn encode_object(frame: &Frame) -> Value {
    match frame {
        Frame::Join {
            request_id,
            land_type,
            land_instance_id,
            options,
            encoding,
        } => {
            let mut obj = json_map(&[("kind", json!("join"))]);
            obj.insert("requestId".into(), json!(request_id));
            obj.insert("landType".into(), json!(land_type));
            insert_opt(&mut obj, "landInstanceId", land_instance_id.as_ref());
            insert_opt(&mut obj, "options", options.as_ref());
            insert_opt(
                &mut obj,
                "encoding",
                encoding.map(|e| json!(e.as_str())).as_ref(),
            );
            Value::Object(obj)
        }
        Frame::JoinResponse {
            request_id,
            success,
            land_type,
            land_instance_id,
            land_id,
            player_slot,
            encoding,
            reason,
        } => {
            let mut obj = json_map(&[("kind", json!("joinResponse"))]);
            obj.insert("requestId".into(), json!(request_id));
            obj.insert("success".into(), json!(success));
            insert_opt(&mut obj, "landType", land_type.as_ref());
            insert_opt(&mut obj, "landInstanceId", land_instance_id.as_ref());
            insert_opt(&mut obj, "landId", land_id.as_ref());
            insert_opt(&mut obj, "playerSlot", player_slot.as_ref());
            insert_opt(
                &mut obj,
                "encoding",
                encoding.map(|e| json!(e.as_str())).as_ref(),
            );
            insert_opt(&mut obj, "reason", reason.as_ref());
            Value::Object(obj)
        }
        Frame::Action {
            request_id,
            envelope,
        } => {
            let mut obj = json_map(&[("kind", json!("action"))]);
            obj.insert("requestId".into(), json!(request_id));
            obj.insert("type".into(), json!(envelope.type_identifier));
            obj.insert("payload".into(), encode_action_payload(&envelope.payload));
            Value::Object(obj)
        }
        Frame::ActionResponse {
            request_id,
            payload,
        } => {
            let mut obj = json_map(&[("kind", json!("actionResponse"))]);
            obj.insert("requestId".into(), json!(request_id));
            insert_opt(&mut obj, "payload", payload.as_ref());
            Value::Object(obj)
        }
        Frame::Event(event) => {
            let mut obj = json_map(&[("kind", json!("event"))]);
            obj.insert(
                "direction".into(),
                match event.direction {
                    EventDirection::FromClient => json!("fromClient"),
                    EventDirection::FromServer => json!("fromServer"),
                },
            );
            obj.insert("name".into(), json!(event.name));
            obj.insert("payload".into(), event.payload.clone());
            Value::Object(obj)
        }
        Frame::Error {
            request_id,
            code,
            message,
        } => {
            let mut obj = json_map(&[("kind", json!("error"))]);
            insert_opt(&mut obj, "requestId", request_id.as_ref());
            obj.insert("code".into(), json!(code.as_str()));
            obj.insert("message".into(), json!(message));
            Value::Object(obj)
        }
        Frame::StateUpdate(update) => encode_update_object(update),
        Frame::StateUpdateWithEvents { update, events } => {
            let mut obj = json_map(&[("kind", json!("stateUpdateWithEvents"))]);
            obj.insert("update".into(), encode_update_object(update));
            obj.insert(
                "events".into(),
                Value::Array(events.iter().map(encode_event_object).collect()),
            );
            Value::Object(obj)
        }
    }
}

fn encode_update_object(update: &StateUpdate) -> Value {
    // {type, patches}; serde gives the self-describing patch objects.
    serde_json::to_value(update).unwrap_or(Value::Null)
}

fn encode_event_object(event: &EventMessage) -> Value {
    json!({
        "direction": match event.direction {
            EventDirection::FromClient => "fromClient",
            EventDirection::FromServer => "fromServer",
        },
        "name": event.name,
        "payload": event.payload,
    })
}

fn decode_object(map: &Map<String, Value>) -> Result<Frame, CodecError> {
    if let Some(kind) = map.get("kind").and_then(Value::as_str) {
        return match kind {
            "join" => Ok(Frame::Join {
                request_id: req_str(map, "requestId")?,
                land_type: req_str(map, "landType")?,
                land_instance_id: opt_str(map, "landInstanceId"),
                options: map.get("options").cloned().filter(|v| !v.is_null()),
                encoding: opt_encoding(map)?,
            }),
            "joinResponse" => Ok(Frame::JoinResponse {
                request_id: req_str(map, "requestId")?,
                success: map
                    .get("success")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| CodecError::Malformed("joinResponse.success".to_string()))?,
                land_type: opt_str(map, "landType"),
                land_instance_id: opt_str(map, "landInstanceId"),
                land_id: opt_str(map, "landId"),
                player_slot: opt_str(map, "playerSlot"),
                encoding: opt_encoding(map)?,
                reason: opt_str(map, "reason"),
            }),
            "action" => Ok(Frame::Action {
                request_id: req_str(map, "requestId")?,
                envelope: ActionEnvelope {
                    type_identifier: req_str(map, "type")?,
                    payload: decode_action_payload(
                        map.get("payload").unwrap_or(&Value::Null),
                    )?,
                },
            }),
            "actionResponse" => Ok(Frame::ActionResponse {
                request_id: req_str(map, "requestId")?,
                payload: map.get("payload").cloned().filter(|v| !v.is_null()),
            }),
            "event" => Ok(Frame::Event(decode_event_object(&Value::Object(
                map.clone(),
            ))?)),
            "error" => Ok(Frame::Error {
                request_id: opt_str(map, "requestId"),
                code: map
                    .get("code")
                    .and_then(Value::as_str)
                    .and_then(ErrorCode::parse)
                    .ok_or_else(|| CodecError::Malformed("error.code".to_string()))?,
                message: req_str(map, "message")?,
            }),
            "stateUpdateWithEvents" => {
                let update = map
                    .get("update")
                    .ok_or_else(|| CodecError::Malformed("missing update".to_string()))?;
                let events = map
                    .get("events")
                    .and_then(Value::as_array)
                    .ok_or_else(|| CodecError::Malformed("missing events".to_string()))?;
                Ok(Frame::StateUpdateWithEvents {
                    update: decode_update_object(update)?,
                    events: events
                        .iter()
                        .map(decode_event_object)
                        .collect::<Result<_, _>>()?,
                })
            }
            other => Err(CodecError::Malformed(format!("unknown kind `{other}`"))),
        };
    }

    if map.contains_key("type") && map.contains_key("patches") {
        return Ok(Frame::StateUpdate(decode_update_object(&Value::Object(
            map.clone(),
        ))?));
    }

    // Bare snapshot form: {values} is a full sync expressed as adds.
    if let Some(values) = map.get("values").and_then(Value::as_object) {
        let patches = values
            .iter()
            .map(|(path, value)| Patch::add(format!("/{}", path.replace('.', "/")), value.clone()))
            .collect();
        return Ok(Frame::StateUpdate(StateUpdate {
            kind: StateUpdateKind::FirstSync,
            patches,
        }));
    }

    Err(CodecError::Malformed("unrecognized object frame".to_string()))
}

fn decode_update_object(value: &Value) -> Result<StateUpdate, CodecError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CodecError::Malformed(format!("state update: {e}")))
}

fn decode_event_object(value: &Value) -> Result<EventMessage, CodecError> {
    let map = value
        .as_object()
        .ok_or_else(|| CodecError::Malformed("event".to_string()))?;
    let direction = match map.get("direction").and_then(Value::as_str) {
        Some("fromClient") => EventDirection::FromClient,
        Some("fromServer") => EventDirection::FromServer,
        _ => return Err(CodecError::Malformed("event.direction".to_string())),
    };
    Ok(EventMessage {
        direction,
        name: req_str(map, "name")?,
        payload: map.get("payload").cloned().unwrap_or(Value::Null),
    })
}

// ---- opcode array form ----

fn encode_array(
    frame: &Frame,
    paths: Option<&PathTable>,
    mut slots: Option<&mut SlotTable>,
    events: Option<&EventSchemaTable>,
) -> Value {
    match frame {
        Frame::Join {
            request_id,
            land_type,
            land_instance_id,
            options,
            encoding,
        } => json!([
            MessageKind::Join.opcode(),
            request_id,
            land_type,
            land_instance_id,
            options,
            encoding.map(WireEncoding::as_str),
        ]),
        Frame::JoinResponse {
            request_id,
            success,
            land_type,
            land_instance_id,
            land_id,
            player_slot,
            encoding,
            reason,
        } => json!([
            MessageKind::JoinResponse.opcode(),
            request_id,
            success,
            land_type,
            land_instance_id,
            land_id,
            player_slot,
            encoding.map(WireEncoding::as_str),
            reason,
        ]),
        Frame::Action {
            request_id,
            envelope,
        } => json!([
            MessageKind::Action.opcode(),
            request_id,
            envelope.type_identifier,
            encode_action_payload(&envelope.payload),
        ]),
        Frame::ActionResponse {
            request_id,
            payload,
        } => json!([MessageKind::ActionResponse.opcode(), request_id, payload]),
        Frame::Event(event) => json!([
            MessageKind::Event.opcode(),
            event.direction.opcode(),
            event.name,
            encode_event_payload(event, events),
        ]),
        Frame::Error {
            request_id,
            code,
            message,
        } => json!([
            MessageKind::Error.opcode(),
            request_id,
            code.as_str(),
            message,
        ]),
        Frame::StateUpdate(update) => encode_update_array(update, paths, slots.as_deref_mut()),
        Frame::StateUpdateWithEvents { update, events: evs } => json!([
            MessageKind::StateUpdateWithEvents.opcode(),
            encode_update_array(update, paths, slots),
            evs.iter()
                .map(|e| json!([
                    e.direction.opcode(),
                    e.name,
                    encode_event_payload(e, events),
                ]))
                .collect::<Vec<_>>(),
        ]),
    }
}

fn encode_update_array(
    update: &StateUpdate,
    paths: Option<&PathTable>,
    mut slots: Option<&mut SlotTable>,
) -> Value {
    let mut out = vec![Value::from(update.kind.opcode())];
    for patch in &update.patches {
        let compressed = paths.and_then(|table| compress_patch(patch, table, slots.as_deref_mut()));
        out.push(compressed.unwrap_or_else(|| verbose_patch(patch)));
    }
    Value::Array(out)
}

fn verbose_patch(patch: &Patch) -> Value {
    let mut arr = vec![Value::from(patch.path.as_str()), Value::from(patch.op.opcode())];
    if let Some(value) = &patch.value {
        arr.push(value.clone());
    }
    Value::Array(arr)
}

fn encode_event_payload(event: &EventMessage, events: Option<&EventSchemaTable>) -> Value {
    events
        .and_then(|table| table.to_array(&event.name, &event.payload))
        .unwrap_or_else(|| event.payload.clone())
}

fn decode_array(
    items: &[Value],
    paths: &PathTable,
    slots: &mut SlotTable,
    events: Option<&EventSchemaTable>,
) -> Result<Frame, CodecError> {
    let opcode = items
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| CodecError::Malformed("missing opcode".to_string()))?;

    if let Some(kind) = StateUpdateKind::from_opcode(opcode) {
        return Ok(Frame::StateUpdate(decode_update_array(
            kind,
            &items[1..],
            paths,
            slots,
        )?));
    }

    let kind = MessageKind::from_opcode(opcode).ok_or(CodecError::UnknownKind(opcode))?;
    match kind {
        MessageKind::Join => Ok(Frame::Join {
            request_id: arr_str(items, 1)?,
            land_type: arr_str(items, 2)?,
            land_instance_id: arr_opt_str(items, 3),
            options: items.get(4).cloned().filter(|v| !v.is_null()),
            encoding: arr_encoding(items, 5)?,
        }),
        MessageKind::JoinResponse => Ok(Frame::JoinResponse {
            request_id: arr_str(items, 1)?,
            success: items
                .get(2)
                .and_then(Value::as_bool)
                .ok_or_else(|| CodecError::Malformed("joinResponse.success".to_string()))?,
            land_type: arr_opt_str(items, 3),
            land_instance_id: arr_opt_str(items, 4),
            land_id: arr_opt_str(items, 5),
            player_slot: arr_opt_str(items, 6),
            encoding: arr_encoding(items, 7)?,
            reason: arr_opt_str(items, 8),
        }),
        MessageKind::Action => Ok(Frame::Action {
            request_id: arr_str(items, 1)?,
            envelope: ActionEnvelope {
                type_identifier: arr_str(items, 2)?,
                payload: decode_action_payload(items.get(3).unwrap_or(&Value::Null))?,
            },
        }),
        MessageKind::ActionResponse => Ok(Frame::ActionResponse {
            request_id: arr_str(items, 1)?,
            payload: items.get(2).cloned().filter(|v| !v.is_null()),
        }),
        MessageKind::Event => {
            let direction = items
                .get(1)
                .and_then(Value::as_i64)
                .and_then(EventDirection::from_opcode)
                .ok_or_else(|| CodecError::Malformed("event.direction".to_string()))?;
            let name = arr_str(items, 2)?;
            let payload = decode_event_payload(&name, items.get(3), events)?;
            Ok(Frame::Event(EventMessage {
                direction,
                name,
                payload,
            }))
        }
        MessageKind::Error => Ok(Frame::Error {
            request_id: arr_opt_str(items, 1),
            code: items
                .get(2)
                .and_then(Value::as_str)
                .and_then(ErrorCode::parse)
                .ok_or_else(|| CodecError::Malformed("error.code".to_string()))?,
            message: arr_str(items, 3)?,
        }),
        MessageKind::StateUpdateWithEvents => {
            let update_items = items
                .get(1)
                .and_then(Value::as_array)
                .ok_or_else(|| CodecError::Malformed("missing update payload".to_string()))?;
            let update_kind = update_items
                .first()
                .and_then(Value::as_i64)
                .and_then(StateUpdateKind::from_opcode)
                .ok_or_else(|| CodecError::Malformed("update kind".to_string()))?;
            let update = decode_update_array(update_kind, &update_items[1..], paths, slots)?;
            let event_items = items
                .get(2)
                .and_then(Value::as_array)
                .ok_or_else(|| CodecError::Malformed("missing events payload".to_string()))?;
            let mut decoded_events = Vec::with_capacity(event_items.len());
            for entry in event_items {
                let entry = entry
                    .as_array()
                    .ok_or_else(|| CodecError::Malformed("event entry".to_string()))?;
                let direction = entry
                    .first()
                    .and_then(Value::as_i64)
                    .and_then(EventDirection::from_opcode)
                    .ok_or_else(|| CodecError::Malformed("event.direction".to_string()))?;
                let name = arr_str(entry, 1)?;
                let payload = decode_event_payload(&name, entry.get(2), events)?;
                decoded_events.push(EventMessage {
                    direction,
                    name,
                    payload,
                });
            }
            Ok(Frame::StateUpdateWithEvents {
                update,
                events: decoded_events,
            })
        }
    }
}

fn decode_update_array(
    kind: StateUpdateKind,
    patch_items: &[Value],
    paths: &PathTable,
    slots: &mut SlotTable,
) -> Result<StateUpdate, CodecError> {
    let mut patches = Vec::with_capacity(patch_items.len());
    for item in patch_items {
        let arr = item
            .as_array()
            .ok_or_else(|| CodecError::Malformed("patch entry".to_string()))?;
        patches.push(expand_patch(arr, paths, slots)?);
    }
    Ok(StateUpdate { kind, patches })
}

fn decode_event_payload(
    name: &str,
    payload: Option<&Value>,
    events: Option<&EventSchemaTable>,
) -> Result<Value, CodecError> {
    match payload {
        Some(Value::Array(items)) => match events {
            Some(table) => table.from_array(name, items),
            None => Err(CodecError::UnknownEventShape(name.to_string())),
        },
        Some(other) => Ok(other.clone()),
        None => Ok(Value::Null),
    }
}

// ---- shared helpers ----

fn encode_action_payload(payload: &ActionPayload) -> Value {
    match payload {
        ActionPayload::Base64Json(text) => Value::from(text.as_str()),
        ActionPayload::Raw(bytes) => {
            use base64::Engine as _;
            json!({"raw": base64::engine::general_purpose::STANDARD.encode(bytes)})
        }
    }
}

fn decode_action_payload(value: &Value) -> Result<ActionPayload, CodecError> {
    match value {
        Value::String(text) => Ok(ActionPayload::Base64Json(text.clone())),
        Value::Object(map) => {
            use base64::Engine as _;
            let raw = map
                .get("raw")
                .and_then(Value::as_str)
                .ok_or_else(|| CodecError::Malformed("action payload".to_string()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(raw)
                .map_err(|e| CodecError::Malformed(format!("action payload base64: {e}")))?;
            Ok(ActionPayload::Raw(bytes))
        }
        _ => Err(CodecError::Malformed("action payload".to_string())),
    }
}

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn insert_opt<T: serde::Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<&T>) {
    if let Some(value) = value
        && let Ok(value) = serde_json::to_value(value)
    {
        map.insert(key.to_string(), value);
    }
}

fn req_str(map: &Map<String, Value>, key: &str) -> Result<String, CodecError> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CodecError::Malformed(format!("missing `{key}`")))
}

fn opt_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn opt_encoding(map: &Map<String, Value>) -> Result<Option<WireEncoding>, CodecError> {
    match map.get("encoding") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => WireEncoding::parse(s)
            .map(Some)
            .ok_or_else(|| CodecError::Malformed(format!("encoding `{s}`"))),
        Some(_) => Err(CodecError::Malformed("encoding".to_string())),
    }
}

fn arr_str(items: &[Value], index: usize) -> Result<String, CodecError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CodecError::Malformed(format!("missing element {index}")))
}

fn arr_opt_str(items: &[Value], index: usize) -> Option<String> {
    items.get(index).and_then(Value::as_str).map(str::to_string)
}

fn arr_encoding(items: &[Value], index: usize) -> Result<Option<WireEncoding>, CodecError> {
    match items.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => WireEncoding::parse(s)
            .map(Some)
            .ok_or_else(|| CodecError::Malformed(format!("encoding `{s}`"))),
        Some(_) => Err(CodecError::Malformed("encoding".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::diff::PatchOp;
    use serde_json::json;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::Join {
                request_id: "r1".into(),
                land_type: "arena".into(),
                land_instance_id: Some("m1".into()),
                options: Some(json!({"team": "red"})),
                encoding: Some(WireEncoding::OpcodeArray),
            },
            Frame::JoinResponse {
                request_id: "r1".into(),
                success: true,
                land_type: Some("arena".into()),
                land_instance_id: Some("m1".into()),
                land_id: Some("arena:m1".into()),
                player_slot: Some("p1".into()),
                encoding: Some(WireEncoding::OpcodeArray),
                reason: None,
            },
            Frame::Action {
                request_id: "r2".into(),
                envelope: ActionEnvelope::new("MoveAction", &json!({"dx": 1000})),
            },
            Frame::ActionResponse {
                request_id: "r2".into(),
                payload: Some(json!({"ok": true})),
            },
            Frame::Event(EventMessage {
                direction: EventDirection::FromServer,
                name: "Scored".into(),
                payload: json!({"player": "p1", "points": 3}),
            }),
            Frame::Error {
                request_id: Some("r3".into()),
                code: ErrorCode::RoomFull,
                message: "land is full".into(),
            },
            Frame::StateUpdate(StateUpdate::no_change()),
            Frame::StateUpdate(StateUpdate {
                kind: StateUpdateKind::Diff,
                patches: vec![
                    Patch::replace("/round", json!(2)),
                    Patch::remove("/players/p2/position"),
                ],
            }),
            Frame::StateUpdateWithEvents {
                update: StateUpdate {
                    kind: StateUpdateKind::FirstSync,
                    patches: vec![Patch::add("/round", json!(0))],
                },
                events: vec![EventMessage {
                    direction: EventDirection::FromServer,
                    name: "Started".into(),
                    payload: json!({"at": "2026-01-01T00:00:00Z"}),
                }],
            },
        ]
    }

    #[test]
    fn round_trip_both_framings() {
        let paths = PathTable::new();
        for encoding in [WireEncoding::JsonObject, WireEncoding::OpcodeArray] {
            let codec = FrameCodec::new(encoding);
            for frame in sample_frames() {
                let mut slots = SlotTable::new();
                let encoded = codec.encode(&frame, None, None, None);
                let decoded = codec.decode(&encoded, &paths, &mut slots, None).unwrap();
                assert_eq!(decoded, frame, "framing {encoding:?}");
            }
        }
    }

    #[test]
    fn encode_decode_is_byte_stable() {
        use crate::determinism::hash::canonical_json;
        let paths = PathTable::new();
        for encoding in [WireEncoding::JsonObject, WireEncoding::OpcodeArray] {
            let codec = FrameCodec::new(encoding);
            for frame in sample_frames() {
                let mut slots = SlotTable::new();
                let first = codec.encode(&frame, None, None, None);
                let decoded = codec.decode(&first, &paths, &mut slots, None).unwrap();
                let second = codec.encode(&decoded, None, None, None);
                assert_eq!(canonical_json(&first), canonical_json(&second));
            }
        }
    }

    #[test]
    fn opcode_patch_decode_with_registered_path() {
        let paths = PathTable::from_patterns(["players.*.position"]);
        let (hash, _) = paths.compress("players.p1.position").unwrap();
        let codec = FrameCodec::new(WireEncoding::OpcodeArray);
        let mut slots = SlotTable::new();

        // [diff, [pathHash, dynamicKey, op, value]]
        let frame = json!([2, [hash, 1, 1, 100]]);
        let decoded = codec.decode(&frame, &paths, &mut slots, None).unwrap();
        let Frame::StateUpdate(update) = decoded else {
            panic!("expected state update");
        };
        assert_eq!(update.kind, StateUpdateKind::Diff);
        assert_eq!(update.patches.len(), 1);
        assert_eq!(update.patches[0].path, "/players/1/position");
        assert_eq!(update.patches[0].op, PatchOp::Replace);
        assert_eq!(update.patches[0].value, Some(json!(100)));
    }

    #[test]
    fn compressed_encode_round_trips_through_slots() {
        let paths = PathTable::from_patterns(["players.*.position"]);
        let codec = FrameCodec::new(WireEncoding::OpcodeArray);
        let update = Frame::StateUpdate(StateUpdate {
            kind: StateUpdateKind::Diff,
            patches: vec![Patch::replace("/players/p1/position", json!([1000, 2000]))],
        });

        let mut enc_slots = SlotTable::new();
        let mut dec_slots = SlotTable::new();
        for _ in 0..2 {
            let encoded = codec.encode(&update, Some(&paths), Some(&mut enc_slots), None);
            let decoded = codec.decode(&encoded, &paths, &mut dec_slots, None).unwrap();
            assert_eq!(decoded, update);
        }
    }

    #[test]
    fn event_payload_field_order_round_trip() {
        let mut table = EventSchemaTable::new();
        table.register("Scored", ["player".to_string(), "points".to_string()]);
        let codec = FrameCodec::new(WireEncoding::OpcodeArray);
        let frame = Frame::Event(EventMessage {
            direction: EventDirection::FromServer,
            name: "Scored".into(),
            payload: json!({"player": "p1", "points": 3}),
        });

        let encoded = codec.encode(&frame, None, None, Some(&table));
        // Payload travels as a field-ordered array.
        assert_eq!(encoded.as_array().unwrap()[3], json!(["p1", 3]));
        let paths = PathTable::new();
        let mut slots = SlotTable::new();
        let decoded = codec
            .decode(&encoded, &paths, &mut slots, Some(&table))
            .unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn replay_tick_decodes_without_land_schema() {
        let table = EventSchemaTable::new();
        let codec = FrameCodec::new(WireEncoding::OpcodeArray);
        let frame = json!([103, 1, "ReplayTick", [5, false, "aa", "bb"]]);
        let paths = PathTable::new();
        let mut slots = SlotTable::new();
        let decoded = codec
            .decode(&frame, &paths, &mut slots, Some(&table))
            .unwrap();
        let Frame::Event(event) = decoded else {
            panic!("expected event");
        };
        assert_eq!(
            event.payload,
            json!({"tickId": 5, "isMatch": false, "expectedHash": "aa", "actualHash": "bb"})
        );
    }

    #[test]
    fn snapshot_values_object_decodes_as_first_sync() {
        let codec = FrameCodec::new(WireEncoding::JsonObject);
        let frame = json!({"values": {"round": 1, "players.p1.hp": 10}});
        let paths = PathTable::new();
        let mut slots = SlotTable::new();
        let decoded = codec.decode(&frame, &paths, &mut slots, None).unwrap();
        let Frame::StateUpdate(update) = decoded else {
            panic!("expected state update");
        };
        assert_eq!(update.kind, StateUpdateKind::FirstSync);
        assert!(
            update
                .patches
                .iter()
                .any(|p| p.path == "/players/p1/hp" && p.value == Some(json!(10)))
        );
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let codec = FrameCodec::new(WireEncoding::OpcodeArray);
        let paths = PathTable::new();
        let mut slots = SlotTable::new();
        assert_eq!(
            codec.decode(&json!([42, "x"]), &paths, &mut slots, None),
            Err(CodecError::UnknownKind(42))
        );
    }

    #[test]
    fn raw_action_payload_round_trips() {
        let codec = FrameCodec::new(WireEncoding::OpcodeArray);
        let frame = Frame::Action {
            request_id: "r9".into(),
            envelope: ActionEnvelope {
                type_identifier: "Blob".into(),
                payload: ActionPayload::Raw(br#"{"n": 1}"#.to_vec()),
            },
        };
        let paths = PathTable::new();
        let mut slots = SlotTable::new();
        let encoded = codec.encode(&frame, None, None, None);
        assert_eq!(codec.decode(&encoded, &paths, &mut slots, None).unwrap(), frame);
    }
}
