// Authoritative state tree model.
//
// A land's state is a typed record whose leaves declare a visibility mode.
// The engine never reflects over the record; the `LandState` visitor seam
// walks the leaves, and the snapshot/diff machinery works on the canonical
// values the visitor emits.

use std::collections::BTreeMap;
use std::ops::Deref;

use serde::Serialize;
use serde_json::Value;

use crate::api::ident::PlayerId;

pub mod diff;
pub mod path;
pub mod snapshot;
pub mod sync;

/// Visibility of one state leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Replicated identically to every client.
    Broadcast,
    /// Scoped by player; each client sees only its own slice.
    PerClient,
    /// Snapshotted for recording, never replicated.
    ServerOnly,
    /// Excluded from replication and recording both.
    Internal,
}

/// Value a leaf contributes to a snapshot.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Plain(Value),
    /// Per-player slices, keyed by player id.
    PerPlayer(BTreeMap<String, Value>),
}

/// Receives leaves during a state walk.
pub trait FieldVisitor {
    fn field(&mut self, path: &str, mode: SyncMode, dirty: bool, value: FieldValue);
}

/// The schema seam between a concrete state record and the engine.
///
/// Implementations walk every leaf in a stable order and report the wildcard
/// patterns (`players.*.position`) the wire layer registers for compression.
pub trait LandState: Send + Sync + 'static {
    fn visit(&self, visitor: &mut dyn FieldVisitor);

    /// Drop all dirty marks after a sync pass that asked for clearing.
    fn clear_dirty(&mut self);

    /// Declared path patterns for patch compression. Concrete map keys appear
    /// as `*` segments.
    fn registered_paths(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A dirty-tracked leaf: `{value, dirty}`. Reads deref to the value;
/// mutation goes through [`Synced::set`] or [`Synced::update`] and marks the
/// leaf dirty so sync passes can restrict traversal to changed subtrees.
#[derive(Debug, Clone, Default)]
pub struct Synced<T> {
    value: T,
    dirty: bool,
}

impl<T> Synced<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            // A fresh leaf has never been replicated.
            dirty: true,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.dirty = true;
    }

    pub fn update(&mut self, mutate: impl FnOnce(&mut T)) {
        mutate(&mut self.value);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl<T: Serialize> Synced<T> {
    /// Canonical value for snapshots.
    pub fn emit(&self) -> Value {
        serde_json::to_value(&self.value).unwrap_or(Value::Null)
    }
}

impl<T> Deref for Synced<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> From<T> for Synced<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Per-player keyed leaf map backing `PerClient` fields. The snapshot engine
/// selects the viewer's slice; the whole map participates in full-mode
/// snapshots and recording.
#[derive(Debug, Clone, Default)]
pub struct PerPlayer<T> {
    values: BTreeMap<String, T>,
    dirty: bool,
}

impl<T> PerPlayer<T> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            dirty: true,
        }
    }

    pub fn insert(&mut self, player: &PlayerId, value: T) {
        self.values.insert(player.as_str().to_string(), value);
        self.dirty = true;
    }

    pub fn remove(&mut self, player: &PlayerId) -> Option<T> {
        let removed = self.values.remove(player.as_str());
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn get(&self, player: &PlayerId) -> Option<&T> {
        self.values.get(player.as_str())
    }

    /// Mutable access marks the map dirty.
    pub fn get_mut(&mut self, player: &PlayerId) -> Option<&mut T> {
        let entry = self.values.get_mut(player.as_str());
        if entry.is_some() {
            self.dirty = true;
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.values.iter()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl<T: Serialize> PerPlayer<T> {
    /// Canonical slices for snapshots, keyed by player id.
    pub fn emit(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Value::Null)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synced_marks_dirty_on_mutation() {
        let mut leaf = Synced::new(5_i64);
        leaf.clear_dirty();
        assert!(!leaf.is_dirty());
        leaf.set(7);
        assert!(leaf.is_dirty());
        assert_eq!(*leaf.get(), 7);

        leaf.clear_dirty();
        leaf.update(|v| *v += 1);
        assert!(leaf.is_dirty());
        assert_eq!(*leaf, 8);
    }

    #[test]
    fn per_player_tracks_dirty() {
        let mut scores: PerPlayer<i64> = PerPlayer::new();
        scores.clear_dirty();
        scores.insert(&PlayerId::new("p1"), 10);
        assert!(scores.is_dirty());
        scores.clear_dirty();
        assert!(scores.remove(&PlayerId::new("missing")).is_none());
        assert!(!scores.is_dirty());
        *scores.get_mut(&PlayerId::new("p1")).unwrap() = 20;
        assert!(scores.is_dirty());
        assert_eq!(scores.emit()["p1"], serde_json::json!(20));
    }
}
