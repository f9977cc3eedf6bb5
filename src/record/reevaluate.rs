//! Offline re-evaluation.
//!
//! Replays a record file against the same land definition: lifecycle events
//! and inputs are re-applied in sequence order with their recorded resolver
//! outputs, the tick handler runs for every tick up to the recorded maximum,
//! and the canonical state hash after each tick is compared against the
//! recorded one. Mismatches come back as result data; re-evaluation never
//! throws over a divergence.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::api::ident::LandId;
use crate::api::message::ReplayTick;
use crate::determinism::hash::canonical_json;
use crate::record::export::JsonlTickLine;
use crate::record::{InputKind, RecordError, RecordFile, RecordedServerEvent};
use crate::record::recorder::InputIds;
use crate::server::definition::LandDefinition;
use crate::server::executor::LandCore;
use crate::state::LandState;
use crate::state::snapshot::to_tree;
use std::sync::Arc;

/// One position where live and replayed server events disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEventMismatch {
    pub tick_id: i64,
    /// Position within the tick's event list.
    pub index: usize,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

/// One snapshot field that diverged from a recorded JSONL export.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMismatch {
    pub tick_id: i64,
    pub path: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

#[derive(Debug, Default)]
pub struct ReevaluationReport {
    pub max_tick_id: i64,
    pub tick_hashes: BTreeMap<i64, String>,
    pub recorded_state_hashes: BTreeMap<i64, String>,
    pub server_event_mismatches: Vec<ServerEventMismatch>,
    pub snapshot_mismatches: Vec<SnapshotMismatch>,
    /// Per-tick verification events, ready for system-event emission.
    pub replay_ticks: Vec<ReplayTick>,
    pub initial_hash_match: Option<bool>,
}

impl ReevaluationReport {
    /// True when the replayed timeline is bit-identical to the record.
    pub fn is_clean(&self) -> bool {
        self.server_event_mismatches.is_empty()
            && self.snapshot_mismatches.is_empty()
            && self.replay_ticks.iter().all(|t| t.is_match)
            && self.initial_hash_match != Some(false)
    }
}

/// Re-evaluate a record against the definition it was produced by.
pub fn reevaluate<S: LandState>(
    definition: Arc<LandDefinition<S>>,
    initial: S,
    record: &RecordFile,
) -> Result<ReevaluationReport, RecordError> {
    reevaluate_full(definition, initial, record, None, None)
}

/// Full-control variant: optionally compare against a recorded snapshot
/// JSONL and observe each replayed tick (for streaming export).
pub fn reevaluate_full<S: LandState>(
    definition: Arc<LandDefinition<S>>,
    initial: S,
    record: &RecordFile,
    expected_snapshots: Option<&BTreeMap<i64, JsonlTickLine>>,
    mut on_tick: Option<&mut dyn FnMut(&JsonlTickLine)>,
) -> Result<ReevaluationReport, RecordError> {
    let metadata = &record.record_metadata;
    if metadata.land_type != definition.land_type() {
        return Err(RecordError::LandTypeMismatch {
            recorded: metadata.land_type.clone(),
            expected: definition.land_type().to_string(),
        });
    }
    let (land_type, instance) = metadata
        .land_id
        .split_once(':')
        .ok_or_else(|| RecordError::Parse(format!("land id `{}`", metadata.land_id)))?;
    let land_id = LandId::new(land_type, instance);

    let mut core = LandCore::for_reevaluation(land_id, definition, initial, metadata.clone());
    core.initialize();

    let mut report = ReevaluationReport {
        max_tick_id: record.max_tick_id(),
        ..ReevaluationReport::default()
    };
    report.initial_hash_match = metadata
        .initial_state_hash
        .as_ref()
        .map(|recorded| *recorded == core.state_hash());

    // An empty record re-evaluates without stepping any ticks.
    if report.max_tick_id < 0 {
        return Ok(report);
    }

    let mut snapshots: Vec<(i64, Value, String)> = Vec::new();
    for tick in 0..=report.max_tick_id {
        if let Some(frame) = record.frame(tick) {
            let mut lifecycle: Vec<_> = frame.lifecycle_events.iter().collect();
            lifecycle.sort_by_key(|e| e.sequence);
            for event in lifecycle {
                core.apply_recorded_lifecycle(event);
            }

            for input in frame.inputs_in_sequence() {
                let ids = InputIds {
                    player_id: input.player_id.clone(),
                    client_id: input.client_id.clone(),
                    session_id: input.session_id.clone(),
                };
                let outcome = match input.kind {
                    InputKind::Action => core
                        .apply_action(
                            &input.type_identifier,
                            input.payload.clone(),
                            ids,
                            input.resolver_outputs.clone(),
                        )
                        .map(|_| ()),
                    InputKind::ClientEvent => core.apply_client_event(
                        &input.type_identifier,
                        input.payload.clone(),
                        ids,
                        input.resolver_outputs.clone(),
                    ),
                    InputKind::Lifecycle => Ok(()),
                };
                if let Err(err) = outcome {
                    // A failing handler failed live too; the divergence, if
                    // any, shows up in the hashes.
                    log::debug!("tick {tick}: replayed input failed: {err}");
                }
            }
        }

        let tick_id = core.step_tick_once();
        let hash = core.state_hash();
        report.tick_hashes.insert(tick_id, hash.clone());
        snapshots.push((tick_id, to_tree(&core.full_snapshot()), hash));
    }

    let replayed = core.into_recorder().finish();

    for (tick_id, snapshot, actual_hash) in snapshots {
        let recorded_frame = record.frame(tick_id);
        let recorded_hash = recorded_frame.and_then(|f| f.state_hash.clone());
        if let Some(recorded) = &recorded_hash {
            report
                .recorded_state_hashes
                .insert(tick_id, recorded.clone());
        }
        let is_match = recorded_hash
            .as_ref()
            .is_none_or(|recorded| *recorded == actual_hash);
        report.replay_ticks.push(ReplayTick {
            tick_id,
            is_match,
            expected_hash: recorded_hash.unwrap_or_else(|| actual_hash.clone()),
            actual_hash: actual_hash.clone(),
        });

        let expected_events = recorded_frame.map(|f| f.server_events.as_slice()).unwrap_or(&[]);
        let actual_events = replayed
            .frame(tick_id)
            .map(|f| f.server_events.as_slice())
            .unwrap_or(&[]);
        compare_events(tick_id, expected_events, actual_events, &mut report);

        if let Some(expected) = expected_snapshots.and_then(|map| map.get(&tick_id)) {
            compare_snapshots(tick_id, &expected.state_snapshot, &snapshot, &mut report);
        }

        if let Some(observer) = on_tick.as_deref_mut() {
            observer(&JsonlTickLine {
                tick_id,
                state_snapshot: snapshot,
                state_hash: Some(actual_hash),
                server_events: actual_events.to_vec(),
            });
        }
    }

    Ok(report)
}

fn event_value(event: &RecordedServerEvent) -> Value {
    json!({
        "name": event.name,
        "payload": event.payload,
        "target": serde_json::to_value(&event.target).unwrap_or(Value::Null),
    })
}

fn compare_events(
    tick_id: i64,
    expected: &[RecordedServerEvent],
    actual: &[RecordedServerEvent],
    report: &mut ReevaluationReport,
) {
    let len = expected.len().max(actual.len());
    for index in 0..len {
        let expected_value = expected.get(index).map(event_value);
        let actual_value = actual.get(index).map(event_value);
        let matches = match (&expected_value, &actual_value) {
            (Some(a), Some(b)) => canonical_json(a) == canonical_json(b),
            _ => false,
        };
        if !matches {
            report.server_event_mismatches.push(ServerEventMismatch {
                tick_id,
                index,
                expected: expected_value,
                actual: actual_value,
            });
        }
    }
}

fn flatten(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(child, &path, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

fn compare_snapshots(
    tick_id: i64,
    expected: &Value,
    actual: &Value,
    report: &mut ReevaluationReport,
) {
    let mut expected_map = BTreeMap::new();
    let mut actual_map = BTreeMap::new();
    flatten(expected, "", &mut expected_map);
    flatten(actual, "", &mut actual_map);

    for (path, expected_value) in &expected_map {
        match actual_map.get(path) {
            Some(actual_value) if actual_value == expected_value => {}
            other => report.snapshot_mismatches.push(SnapshotMismatch {
                tick_id,
                path: path.clone(),
                expected: Some(expected_value.clone()),
                actual: other.cloned(),
            }),
        }
    }
    for (path, actual_value) in &actual_map {
        if !expected_map.contains_key(path) {
            report.snapshot_mismatches.push(SnapshotMismatch {
                tick_id,
                path: path.clone(),
                expected: None,
                actual: Some(actual_value.clone()),
            });
        }
    }
}
