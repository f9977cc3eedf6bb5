//! Live-mode input recorder.
//!
//! The recorder owns the frame for the tick currently being assembled.
//! Inputs arriving between tick commits land in the frame of the upcoming
//! tick; committing a tick stamps the frame with its state hash and opens
//! the next one. Sequence numbers are global to the recording so intra-tick
//! order survives the round trip through a sorted file.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::api::ident::{ClientId, PlayerId, SessionId};
use crate::api::message::EventTarget;
use crate::record::{
    InputKind, RecordFile, RecordMetadata, RecordedInput, RecordedServerEvent, ResolverOutput,
    TickFrame,
};

#[derive(Debug)]
pub struct Recorder {
    metadata: RecordMetadata,
    frames: Vec<TickFrame>,
    current: TickFrame,
    sequence: u64,
    record_hashes: bool,
    enabled: bool,
}

/// Identity fields shared by every input append.
#[derive(Debug, Clone, Default)]
pub struct InputIds {
    pub player_id: Option<PlayerId>,
    pub client_id: Option<ClientId>,
    pub session_id: Option<SessionId>,
}

impl Recorder {
    pub fn new(metadata: RecordMetadata, record_hashes: bool) -> Self {
        Self {
            metadata,
            frames: Vec::new(),
            current: TickFrame::empty(0),
            sequence: 0,
            record_hashes,
            enabled: true,
        }
    }

    /// A recorder that drops everything. Used during re-evaluation, where
    /// appending again would double-record the timeline.
    pub fn disabled(metadata: RecordMetadata) -> Self {
        let mut recorder = Self::new(metadata, false);
        recorder.enabled = false;
        recorder
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn set_initial_state_hash(&mut self, hash: String) {
        self.metadata.initial_state_hash = Some(hash);
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    pub fn append_input(
        &mut self,
        kind: InputKind,
        type_identifier: &str,
        payload: Value,
        ids: InputIds,
        resolver_outputs: BTreeMap<String, ResolverOutput>,
        resolved_at_tick: i64,
    ) {
        if !self.enabled {
            return;
        }
        let input = RecordedInput {
            kind,
            sequence: self.next_sequence(),
            type_identifier: type_identifier.to_string(),
            payload,
            player_id: ids.player_id,
            client_id: ids.client_id,
            session_id: ids.session_id,
            resolver_outputs,
            resolved_at_tick,
        };
        match kind {
            InputKind::Action => self.current.actions.push(input),
            InputKind::ClientEvent => self.current.client_events.push(input),
            InputKind::Lifecycle => self.current.lifecycle_events.push(input),
        }
    }

    pub fn append_server_event(&mut self, name: &str, payload: Value, target: EventTarget) {
        if !self.enabled {
            return;
        }
        let sequence = self.next_sequence();
        self.current.server_events.push(RecordedServerEvent {
            sequence,
            name: name.to_string(),
            payload,
            target,
        });
    }

    /// Close the frame for `tick_id` and open the next one. The caller
    /// supplies the canonical full-mode hash computed after the tick handler
    /// ran; it is stored only when hashing was requested.
    pub fn commit_tick(&mut self, tick_id: i64, state_hash: Option<String>) {
        if !self.enabled {
            return;
        }
        let mut frame = std::mem::replace(&mut self.current, TickFrame::empty(tick_id + 1));
        frame.tick_id = tick_id;
        if self.record_hashes {
            frame.state_hash = state_hash;
        }
        self.frames.push(frame);
    }

    /// Finish the recording. Frames come out sorted by tick id; a trailing
    /// partial frame with inputs but no committed tick is kept.
    pub fn finish(mut self) -> RecordFile {
        if !self.current.is_empty() {
            self.frames.push(self.current);
        }
        self.frames.sort_by_key(|f| f.tick_id);
        RecordFile {
            record_metadata: self.metadata,
            tick_frames: self.frames,
        }
    }

    /// Snapshot of the record so far, without consuming the recorder.
    pub fn to_file(&self) -> RecordFile {
        let mut frames = self.frames.clone();
        if !self.current.is_empty() {
            frames.push(self.current.clone());
        }
        frames.sort_by_key(|f| f.tick_id);
        RecordFile {
            record_metadata: self.metadata.clone(),
            tick_frames: frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> RecordMetadata {
        RecordMetadata {
            land_id: "arena:m1".into(),
            land_type: "arena".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            rng_seed: 7,
            initial_state_hash: None,
            version: None,
            hardware_fingerprint: None,
        }
    }

    #[test]
    fn inputs_land_in_the_upcoming_tick_frame() {
        let mut recorder = Recorder::new(metadata(), true);
        recorder.append_input(
            InputKind::Action,
            "MoveAction",
            json!({"dx": 1}),
            InputIds::default(),
            BTreeMap::new(),
            -1,
        );
        recorder.commit_tick(0, Some("aa".repeat(8)));
        recorder.append_input(
            InputKind::Action,
            "MoveAction",
            json!({"dx": 2}),
            InputIds::default(),
            BTreeMap::new(),
            0,
        );
        recorder.commit_tick(1, Some("bb".repeat(8)));

        let file = recorder.finish();
        assert_eq!(file.tick_frames.len(), 2);
        assert_eq!(file.tick_frames[0].tick_id, 0);
        assert_eq!(file.tick_frames[0].actions[0].payload, json!({"dx": 1}));
        assert_eq!(file.tick_frames[1].actions[0].payload, json!({"dx": 2}));
        assert_eq!(file.tick_frames[1].actions[0].resolved_at_tick, 0);
    }

    #[test]
    fn sequence_is_monotone_across_kinds() {
        let mut recorder = Recorder::new(metadata(), false);
        recorder.append_input(
            InputKind::Action,
            "A",
            Value::Null,
            InputIds::default(),
            BTreeMap::new(),
            -1,
        );
        recorder.append_server_event("E", Value::Null, EventTarget::All);
        recorder.append_input(
            InputKind::ClientEvent,
            "C",
            Value::Null,
            InputIds::default(),
            BTreeMap::new(),
            -1,
        );
        recorder.commit_tick(0, None);

        let file = recorder.finish();
        let frame = &file.tick_frames[0];
        assert_eq!(frame.actions[0].sequence, 0);
        assert_eq!(frame.server_events[0].sequence, 1);
        assert_eq!(frame.client_events[0].sequence, 2);
        // Hashing disabled: no hash stored even though commit passed one.
        assert_eq!(frame.state_hash, None);
    }

    #[test]
    fn disabled_recorder_stays_empty() {
        let mut recorder = Recorder::disabled(metadata());
        recorder.append_input(
            InputKind::Action,
            "A",
            Value::Null,
            InputIds::default(),
            BTreeMap::new(),
            -1,
        );
        recorder.commit_tick(0, None);
        assert!(recorder.finish().tick_frames.is_empty());
    }

    #[test]
    fn trailing_partial_frame_is_kept() {
        let mut recorder = Recorder::new(metadata(), false);
        recorder.commit_tick(0, None);
        recorder.append_input(
            InputKind::Lifecycle,
            "join",
            json!({"playerId": "p1"}),
            InputIds::default(),
            BTreeMap::new(),
            0,
        );
        let file = recorder.finish();
        assert_eq!(file.tick_frames.len(), 2);
        assert_eq!(file.tick_frames[1].tick_id, 1);
        assert_eq!(file.tick_frames[1].lifecycle_events.len(), 1);
    }
}
