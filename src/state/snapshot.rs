//! Canonical snapshot extraction.
//!
//! A snapshot is a sorted map from dotted field path to canonical value,
//! produced from the state tree under one visibility mode. Timestamps are
//! expected as ISO-8601 strings and fixed-point numbers as raw integers, so
//! a snapshot is hashable and diffable without further normalization.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::api::ident::PlayerId;
use crate::state::{FieldValue, FieldVisitor, LandState, SyncMode};

/// Which slice of the tree a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Everything recordable: broadcast, per-client maps, server-only.
    All,
    /// Broadcast fields only.
    Broadcast,
    /// Broadcast-visible per-client slices for one viewer.
    PerClient(PlayerId),
}

/// Sorted map from dotted path to canonical value.
pub type Snapshot = BTreeMap<String, Value>;

struct Collector<'a> {
    mode: &'a SnapshotMode,
    dirty_only: bool,
    out: Snapshot,
}

impl FieldVisitor for Collector<'_> {
    fn field(&mut self, path: &str, mode: SyncMode, dirty: bool, value: FieldValue) {
        if self.dirty_only && !dirty {
            return;
        }
        match (&self.mode, mode) {
            (_, SyncMode::Internal) => {}
            (SnapshotMode::All, _) => {
                match value {
                    FieldValue::Plain(v) => {
                        self.out.insert(path.to_string(), v);
                    }
                    FieldValue::PerPlayer(slices) => {
                        // Full mode keeps the whole keyed map under the field
                        // path, one entry per player.
                        for (player, v) in slices {
                            self.out.insert(format!("{path}.{player}"), v);
                        }
                    }
                }
            }
            (SnapshotMode::Broadcast, SyncMode::Broadcast) => {
                if let FieldValue::Plain(v) = value {
                    self.out.insert(path.to_string(), v);
                }
            }
            (SnapshotMode::Broadcast, _) => {}
            (SnapshotMode::PerClient(viewer), SyncMode::PerClient) => {
                if let FieldValue::PerPlayer(mut slices) = value {
                    if let Some(v) = slices.remove(viewer.as_str()) {
                        self.out.insert(path.to_string(), v);
                    }
                }
            }
            (SnapshotMode::PerClient(_), _) => {}
        }
    }
}

/// Extract a canonical snapshot under the given mode.
pub fn take_snapshot(state: &dyn LandState, mode: &SnapshotMode) -> Snapshot {
    take_snapshot_inner(state, mode, false)
}

/// Restrict traversal to dirty leaves. The fast path for steady-state syncs:
/// clean leaves cannot have diverged from the baseline, so their absence from
/// the partial snapshot is treated as "unchanged", not "removed".
pub fn take_dirty_snapshot(state: &dyn LandState, mode: &SnapshotMode) -> Snapshot {
    take_snapshot_inner(state, mode, true)
}

fn take_snapshot_inner(state: &dyn LandState, mode: &SnapshotMode, dirty_only: bool) -> Snapshot {
    let mut collector = Collector {
        mode,
        dirty_only,
        out: Snapshot::new(),
    };
    state.visit(&mut collector);
    collector.out
}

/// Nest a flat snapshot into a JSON object tree. The client mirror and the
/// JSONL exporter both want the nested form.
pub fn to_tree(snapshot: &Snapshot) -> Value {
    let mut root = Value::Object(serde_json::Map::new());
    for (path, value) in snapshot {
        let segments: Vec<&str> = path.split('.').collect();
        insert_nested(&mut root, &segments, value);
    }
    root
}

/// Insert `value` at `segments` under `node`, creating intermediate objects
/// as needed. A leaf already sitting where a path wants an object is a
/// conflicting entry, which is skipped rather than clobbered.
fn insert_nested(mut node: &mut Value, segments: &[&str], value: &Value) {
    for (i, segment) in segments.iter().enumerate() {
        let map = match node {
            Value::Object(map) => map,
            _ => return,
        };
        if i + 1 == segments.len() {
            map.insert((*segment).to_string(), value.clone());
            return;
        }
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PerPlayer, Synced};
    use serde_json::json;

    struct Arena {
        round: Synced<i64>,
        secret: Synced<String>,
        scratch: i64,
        hands: PerPlayer<Vec<i64>>,
    }

    impl LandState for Arena {
        fn visit(&self, visitor: &mut dyn FieldVisitor) {
            visitor.field(
                "round",
                SyncMode::Broadcast,
                self.round.is_dirty(),
                FieldValue::Plain(self.round.emit()),
            );
            visitor.field(
                "secret",
                SyncMode::ServerOnly,
                self.secret.is_dirty(),
                FieldValue::Plain(self.secret.emit()),
            );
            visitor.field(
                "scratch",
                SyncMode::Internal,
                false,
                FieldValue::Plain(json!(self.scratch)),
            );
            visitor.field(
                "hands",
                SyncMode::PerClient,
                self.hands.is_dirty(),
                FieldValue::PerPlayer(self.hands.emit()),
            );
        }

        fn clear_dirty(&mut self) {
            self.round.clear_dirty();
            self.secret.clear_dirty();
            self.hands.clear_dirty();
        }
    }

    fn arena() -> Arena {
        let mut hands = PerPlayer::new();
        hands.insert(&PlayerId::new("p1"), vec![1, 2]);
        hands.insert(&PlayerId::new("p2"), vec![9]);
        Arena {
            round: Synced::new(3),
            secret: Synced::new("deck".into()),
            scratch: 42,
            hands,
        }
    }

    #[test]
    fn all_mode_includes_server_only_and_slices() {
        let snap = take_snapshot(&arena(), &SnapshotMode::All);
        assert_eq!(snap["round"], json!(3));
        assert_eq!(snap["secret"], json!("deck"));
        assert_eq!(snap["hands.p1"], json!([1, 2]));
        assert_eq!(snap["hands.p2"], json!([9]));
        assert!(!snap.contains_key("scratch"));
    }

    #[test]
    fn broadcast_mode_is_shared_fields_only() {
        let snap = take_snapshot(&arena(), &SnapshotMode::Broadcast);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["round"], json!(3));
    }

    #[test]
    fn per_client_mode_selects_viewer_slice() {
        let snap = take_snapshot(&arena(), &SnapshotMode::PerClient(PlayerId::new("p1")));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["hands"], json!([1, 2]));

        let other = take_snapshot(&arena(), &SnapshotMode::PerClient(PlayerId::new("p3")));
        assert!(other.is_empty());
    }

    #[test]
    fn dirty_snapshot_skips_clean_leaves() {
        let mut state = arena();
        state.clear_dirty();
        state.round.set(4);
        let snap = take_dirty_snapshot(&state, &SnapshotMode::All);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["round"], json!(4));
    }

    #[test]
    fn tree_nesting() {
        let snap = take_snapshot(&arena(), &SnapshotMode::All);
        let tree = to_tree(&snap);
        assert_eq!(tree["hands"]["p1"], json!([1, 2]));
        assert_eq!(tree["round"], json!(3));
    }
}
