//! Mirrored land state.
//!
//! The client holds one JSON tree per joined land, built purely by applying
//! server patches in order. After a `firstSync` the mirror equals the
//! canonical snapshot of everything the server lets this client see, and
//! every `diff` keeps it there.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::api::message::{StateUpdate, StateUpdateKind};
use crate::client::error::ClientError;
use crate::state::diff::{Patch, PatchOp};

/// Apply one JSON-Pointer patch to a nested value tree. Intermediate objects
/// are created on add/replace; removing a missing path is a no-op.
pub fn apply_patch_to_tree(tree: &mut Value, patch: &Patch) {
    let segments: Vec<String> = patch
        .path
        .trim_start_matches('/')
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();
    if segments.is_empty() {
        return;
    }

    let mut node = tree;
    for segment in &segments[..segments.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(serde_json::Map::new());
        }
        let map = match node.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    let leaf = match segments.last() {
        Some(leaf) => leaf,
        None => return,
    };
    if !node.is_object() {
        *node = Value::Object(serde_json::Map::new());
    }
    let Some(map) = node.as_object_mut() else {
        return;
    };
    match patch.op {
        PatchOp::Remove => {
            map.remove(leaf);
        }
        PatchOp::Add | PatchOp::Replace => {
            if let Some(value) = &patch.value {
                map.insert(leaf.clone(), value.clone());
            }
        }
    }
}

/// One land as this client sees it.
#[derive(Debug, Clone)]
pub struct LandMirror {
    pub land_type: String,
    /// Canonical id, known once the join response arrives.
    pub land_id: Option<String>,
    pub state: Value,
    /// True once a `firstSync` landed.
    pub synced: bool,
}

impl LandMirror {
    pub fn new(land_type: impl Into<String>) -> Self {
        Self {
            land_type: land_type.into(),
            land_id: None,
            state: Value::Object(serde_json::Map::new()),
            synced: false,
        }
    }

    /// Apply one replication frame in patch order.
    pub fn apply_update(&mut self, update: &StateUpdate) -> Vec<Patch> {
        match update.kind {
            StateUpdateKind::NoChange => Vec::new(),
            StateUpdateKind::FirstSync => {
                self.state = Value::Object(serde_json::Map::new());
                self.synced = true;
                self.apply_patches(&update.patches)
            }
            StateUpdateKind::Diff => self.apply_patches(&update.patches),
        }
    }

    fn apply_patches(&mut self, patches: &[Patch]) -> Vec<Patch> {
        for patch in patches {
            apply_patch_to_tree(&mut self.state, patch);
        }
        patches.to_vec()
    }
}

/// The client-side land views, keyed by canonical land id.
///
/// Routing an inbound frame prefers the exact active view; a frame for a
/// land whose canonical id is new but whose type matches an existing view
/// reassigns that view rather than dropping the frame.
#[derive(Default)]
pub struct ActiveLands {
    views: RwLock<HashMap<String, Mutex<LandMirror>>>,
    active: RwLock<Option<String>>,
}

impl ActiveLands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the view for a joined land under its canonical id. A view of
    /// the same type parked under a stale key is reassigned, keeping its
    /// mirrored state.
    pub fn adopt(&self, land_type: &str, canonical: &str) {
        let Ok(mut views) = self.views.write() else {
            return;
        };
        if !views.contains_key(canonical) {
            let stale_key = views
                .iter()
                .find(|(key, mirror)| {
                    key.as_str() != canonical
                        && mirror
                            .lock()
                            .map(|m| m.land_type == land_type)
                            .unwrap_or(false)
                })
                .map(|(key, _)| key.clone());
            let mut mirror = match stale_key {
                Some(key) => views.remove(&key).and_then(|m| m.into_inner().ok()),
                None => None,
            }
            .unwrap_or_else(|| LandMirror::new(land_type));
            mirror.land_id = Some(canonical.to_string());
            views.insert(canonical.to_string(), Mutex::new(mirror));
        }
        drop(views);
        if let Ok(mut active) = self.active.write() {
            *active = Some(canonical.to_string());
        }
    }

    pub fn remove(&self, canonical: &str) -> Option<LandMirror> {
        let removed = self
            .views
            .write()
            .ok()?
            .remove(canonical)
            .and_then(|m| m.into_inner().ok());
        if let Ok(mut active) = self.active.write()
            && active.as_deref() == Some(canonical)
        {
            *active = None;
        }
        removed
    }

    pub fn active_key(&self) -> Option<String> {
        self.active.read().ok()?.clone()
    }

    /// Apply an update to the active view.
    pub fn route_update(&self, update: &StateUpdate) -> Result<Vec<Patch>, ClientError> {
        let key = self.active_key().ok_or(ClientError::NotJoined)?;
        let views = self
            .views
            .read()
            .map_err(|_| ClientError::NotJoined)?;
        let mirror = views.get(&key).ok_or(ClientError::NotJoined)?;
        let mut mirror = mirror.lock().map_err(|_| ClientError::NotJoined)?;
        Ok(mirror.apply_update(update))
    }

    /// Clone of the active view's state tree.
    pub fn active_state(&self) -> Option<Value> {
        let key = self.active_key()?;
        let views = self.views.read().ok()?;
        let mirror = views.get(&key)?.lock().ok()?;
        Some(mirror.state.clone())
    }

    pub fn view_count(&self) -> usize {
        self.views.read().map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_sync_then_diff_reconstructs_tree() {
        let mut mirror = LandMirror::new("arena");
        mirror.apply_update(&StateUpdate {
            kind: StateUpdateKind::FirstSync,
            patches: vec![
                Patch::add("/round", json!(0)),
                Patch::add("/players/p1/hp", json!(100)),
            ],
        });
        assert!(mirror.synced);
        assert_eq!(mirror.state, json!({"round": 0, "players": {"p1": {"hp": 100}}}));

        mirror.apply_update(&StateUpdate {
            kind: StateUpdateKind::Diff,
            patches: vec![
                Patch::replace("/round", json!(1)),
                Patch::remove("/players/p1/hp"),
                Patch::add("/players/p2/hp", json!(50)),
            ],
        });
        assert_eq!(
            mirror.state,
            json!({"round": 1, "players": {"p1": {}, "p2": {"hp": 50}}})
        );
    }

    #[test]
    fn first_sync_resets_previous_state() {
        let mut mirror = LandMirror::new("arena");
        mirror.apply_update(&StateUpdate {
            kind: StateUpdateKind::FirstSync,
            patches: vec![Patch::add("/old", json!(true))],
        });
        mirror.apply_update(&StateUpdate {
            kind: StateUpdateKind::FirstSync,
            patches: vec![Patch::add("/new", json!(true))],
        });
        assert_eq!(mirror.state, json!({"new": true}));
    }

    #[test]
    fn escaped_pointer_segments_apply() {
        let mut tree = json!({});
        apply_patch_to_tree(&mut tree, &Patch::add("/a~1b/c~0d", json!(1)));
        assert_eq!(tree, json!({"a/b": {"c~d": 1}}));
    }

    #[test]
    fn adopt_reassigns_stale_type_view() {
        let lands = ActiveLands::new();
        lands.adopt("arena", "arena:temp");
        lands
            .route_update(&StateUpdate {
                kind: StateUpdateKind::FirstSync,
                patches: vec![Patch::add("/round", json!(9))],
            })
            .unwrap();

        // The server answered with the real canonical id; the old view moves
        // over, state intact.
        lands.adopt("arena", "arena:real");
        assert_eq!(lands.view_count(), 1);
        assert_eq!(lands.active_key().unwrap(), "arena:real");
        assert_eq!(lands.active_state().unwrap()["round"], json!(9));
    }

    #[test]
    fn route_update_without_view_is_not_joined() {
        let lands = ActiveLands::new();
        let err = lands.route_update(&StateUpdate::no_change()).unwrap_err();
        assert_eq!(err, ClientError::NotJoined);
    }
}
