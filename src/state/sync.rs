//! Per-client delta pipeline.
//!
//! The engine keeps one shared baseline for broadcast state and one baseline
//! per connected client for that client's per-player slices. Each sync pass
//! diffs the current tree against the baselines and classifies the result
//! per client: `firstSync` for a client with no baseline yet, `noChange`
//! when nothing moved, `diff` otherwise. Baselines advance as patches are
//! emitted, so a patch stream applied in order always reconstructs the
//! canonical snapshot.

use std::collections::HashMap;

use crate::api::ident::{ClientId, PlayerId};
use crate::api::message::{StateUpdate, StateUpdateKind};
use crate::state::LandState;
use crate::state::diff::{apply, diff, diff_partial};
use crate::state::snapshot::{Snapshot, SnapshotMode, take_dirty_snapshot, take_snapshot};

#[derive(Debug)]
struct ClientBaseline {
    player: PlayerId,
    per_client: Snapshot,
    synced: bool,
}

/// Owns the baselines for one land.
#[derive(Debug, Default)]
pub struct SyncEngine {
    broadcast_baseline: Snapshot,
    broadcast_synced: bool,
    clients: HashMap<ClientId, ClientBaseline>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected client. Its first update will be `firstSync`.
    pub fn register_client(&mut self, client: ClientId, player: PlayerId) {
        self.clients.insert(
            client,
            ClientBaseline {
                player,
                per_client: Snapshot::new(),
                synced: false,
            },
        );
    }

    /// Forget a client's baseline on disconnect.
    pub fn drop_client(&mut self, client: &ClientId) {
        self.clients.remove(client);
    }

    pub fn is_tracking(&self, client: &ClientId) -> bool {
        self.clients.contains_key(client)
    }

    /// Full sync pass: one update per tracked client, broadcast patches
    /// first, then the client's per-player patches.
    ///
    /// `dirty_only` restricts traversal to dirty subtrees. The restriction is
    /// only taken when every client already holds a baseline; a first sync
    /// always walks the whole tree.
    pub fn sync_all(
        &mut self,
        state: &dyn LandState,
        dirty_only: bool,
    ) -> Vec<(ClientId, StateUpdate)> {
        let any_unsynced = self.clients.values().any(|c| !c.synced);
        let use_dirty = dirty_only && self.broadcast_synced && !any_unsynced;

        let broadcast_snap = if use_dirty {
            take_dirty_snapshot(state, &SnapshotMode::Broadcast)
        } else {
            take_snapshot(state, &SnapshotMode::Broadcast)
        };
        let broadcast_patches = if use_dirty {
            diff_partial(&self.broadcast_baseline, &broadcast_snap)
        } else {
            diff(&self.broadcast_baseline, &broadcast_snap)
        };
        apply(&mut self.broadcast_baseline, &broadcast_patches);
        self.broadcast_synced = true;

        let mut updates = Vec::with_capacity(self.clients.len());
        for (client, baseline) in &mut self.clients {
            if !baseline.synced {
                let per_snap =
                    take_snapshot(state, &SnapshotMode::PerClient(baseline.player.clone()));
                let mut patches = diff(&Snapshot::new(), &self.broadcast_baseline);
                patches.extend(diff(&Snapshot::new(), &per_snap));
                baseline.per_client = per_snap;
                baseline.synced = true;
                updates.push((
                    client.clone(),
                    StateUpdate {
                        kind: StateUpdateKind::FirstSync,
                        patches,
                    },
                ));
                continue;
            }

            let mode = SnapshotMode::PerClient(baseline.player.clone());
            let per_snap = if use_dirty {
                take_dirty_snapshot(state, &mode)
            } else {
                take_snapshot(state, &mode)
            };
            let per_patches = if use_dirty {
                diff_partial(&baseline.per_client, &per_snap)
            } else {
                diff(&baseline.per_client, &per_snap)
            };
            apply(&mut baseline.per_client, &per_patches);

            let mut patches = broadcast_patches.clone();
            patches.extend(per_patches);
            let kind = if patches.is_empty() {
                StateUpdateKind::NoChange
            } else {
                StateUpdateKind::Diff
            };
            updates.push((client.clone(), StateUpdate { kind, patches }));
        }
        updates
    }

    /// Broadcast-only pass: diffs just the shared fields. Used after a leave,
    /// when only shared state can have changed. Clients still waiting on
    /// their first update get a full `firstSync` instead.
    pub fn sync_broadcast_only(&mut self, state: &dyn LandState) -> Vec<(ClientId, StateUpdate)> {
        let broadcast_snap = take_snapshot(state, &SnapshotMode::Broadcast);
        let broadcast_patches = diff(&self.broadcast_baseline, &broadcast_snap);
        apply(&mut self.broadcast_baseline, &broadcast_patches);
        self.broadcast_synced = true;

        let mut updates = Vec::with_capacity(self.clients.len());
        for (client, baseline) in &mut self.clients {
            if !baseline.synced {
                let per_snap =
                    take_snapshot(state, &SnapshotMode::PerClient(baseline.player.clone()));
                let mut patches = diff(&Snapshot::new(), &self.broadcast_baseline);
                patches.extend(diff(&Snapshot::new(), &per_snap));
                baseline.per_client = per_snap;
                baseline.synced = true;
                updates.push((
                    client.clone(),
                    StateUpdate {
                        kind: StateUpdateKind::FirstSync,
                        patches,
                    },
                ));
                continue;
            }
            let kind = if broadcast_patches.is_empty() {
                StateUpdateKind::NoChange
            } else {
                StateUpdateKind::Diff
            };
            updates.push((
                client.clone(),
                StateUpdate {
                    kind,
                    patches: broadcast_patches.clone(),
                },
            ));
        }
        updates
    }

    /// Close a sync pass. Dirty marks are cleared only when the caller asks,
    /// so disabled dirty tracking costs nothing.
    pub fn end_sync(&mut self, state: &mut dyn LandState, clear_dirty: bool) {
        if clear_dirty {
            state.clear_dirty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::diff::PatchOp;
    use crate::state::{FieldValue, FieldVisitor, PerPlayer, Synced, SyncMode};
    use serde_json::json;

    struct Board {
        round: Synced<i64>,
        hands: PerPlayer<Vec<i64>>,
    }

    impl LandState for Board {
        fn visit(&self, visitor: &mut dyn FieldVisitor) {
            visitor.field(
                "round",
                SyncMode::Broadcast,
                self.round.is_dirty(),
                FieldValue::Plain(self.round.emit()),
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
            self.hands.clear_dirty();
        }
    }

    fn board() -> Board {
        let mut hands = PerPlayer::new();
        hands.insert(&PlayerId::new("p1"), vec![1]);
        Board {
            round: Synced::new(0),
            hands,
        }
    }

    #[test]
    fn first_update_is_first_sync_and_reconstructs_snapshot() {
        let mut engine = SyncEngine::new();
        engine.register_client(ClientId::new("c1"), PlayerId::new("p1"));
        let state = board();

        let updates = engine.sync_all(&state, false);
        assert_eq!(updates.len(), 1);
        let (_, update) = &updates[0];
        assert_eq!(update.kind, StateUpdateKind::FirstSync);
        assert!(update.patches.iter().all(|p| p.op == PatchOp::Add));

        let mut reconstructed = Snapshot::new();
        apply(&mut reconstructed, &update.patches);
        assert_eq!(reconstructed["round"], json!(0));
        assert_eq!(reconstructed["hands"], json!([1]));
    }

    #[test]
    fn steady_state_no_change() {
        let mut engine = SyncEngine::new();
        engine.register_client(ClientId::new("c1"), PlayerId::new("p1"));
        let mut state = board();
        engine.sync_all(&state, false);
        engine.end_sync(&mut state, true);

        let updates = engine.sync_all(&state, true);
        assert_eq!(updates[0].1.kind, StateUpdateKind::NoChange);
        assert!(updates[0].1.patches.is_empty());
    }

    #[test]
    fn per_client_patches_stay_private() {
        let mut engine = SyncEngine::new();
        engine.register_client(ClientId::new("c1"), PlayerId::new("p1"));
        engine.register_client(ClientId::new("c2"), PlayerId::new("p2"));
        let mut state = board();
        state.hands.insert(&PlayerId::new("p2"), vec![7]);
        engine.sync_all(&state, false);
        engine.end_sync(&mut state, true);

        state.hands.get_mut(&PlayerId::new("p1")).unwrap().push(2);
        let updates = engine.sync_all(&state, true);
        let by_client: HashMap<_, _> = updates.into_iter().collect();
        let c1 = &by_client[&ClientId::new("c1")];
        let c2 = &by_client[&ClientId::new("c2")];
        assert_eq!(c1.kind, StateUpdateKind::Diff);
        assert_eq!(c1.patches.len(), 1);
        assert_eq!(c1.patches[0].path, "/hands");
        assert_eq!(c2.kind, StateUpdateKind::NoChange);
    }

    #[test]
    fn broadcast_only_skips_per_client_fields() {
        let mut engine = SyncEngine::new();
        engine.register_client(ClientId::new("c1"), PlayerId::new("p1"));
        let mut state = board();
        engine.sync_all(&state, false);
        engine.end_sync(&mut state, true);

        // Both a broadcast and a per-client change; the broadcast-only pass
        // must surface only the former.
        state.round.set(1);
        state.hands.get_mut(&PlayerId::new("p1")).unwrap().push(9);
        let updates = engine.sync_broadcast_only(&state);
        assert_eq!(updates[0].1.patches.len(), 1);
        assert_eq!(updates[0].1.patches[0].path, "/round");

        // The skipped per-client change is picked up by the next full pass.
        let updates = engine.sync_all(&state, false);
        assert_eq!(updates[0].1.patches.len(), 1);
        assert_eq!(updates[0].1.patches[0].path, "/hands");
    }

    #[test]
    fn dropped_client_resyncs_from_scratch() {
        let mut engine = SyncEngine::new();
        let c1 = ClientId::new("c1");
        engine.register_client(c1.clone(), PlayerId::new("p1"));
        let state = board();
        engine.sync_all(&state, false);

        engine.drop_client(&c1);
        engine.register_client(c1.clone(), PlayerId::new("p1"));
        let updates = engine.sync_all(&state, false);
        assert_eq!(updates[0].1.kind, StateUpdateKind::FirstSync);
    }
}
