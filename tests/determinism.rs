//! Record/replay determinism: run a land live, record everything, replay the
//! record through a fresh core, and compare hashes and server events per
//! tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Value, json};

use tempest::api::ident::{ClientId, LandId, PlayerId, SessionId};
use tempest::api::message::EventTarget;
use tempest::record::RecordFile;
use tempest::record::export::{JsonlExporter, JsonlTickLine, read_jsonl};
use tempest::record::recorder::InputIds;
use tempest::record::reevaluate::{reevaluate, reevaluate_full};
use tempest::server::context::HandlerContext;
use tempest::server::definition::LandDefinition;
use tempest::server::executor::LandCore;
use tempest::server::resolver::{
    LandServices, Resolver, ResolverContext, RngResolver, run_pipeline,
};
use tempest::server::session::{JoinDecision, JoinRequest};
use tempest::state::snapshot::Snapshot;
use tempest::state::{FieldValue, FieldVisitor, LandState, PerPlayer, SyncMode, Synced};

struct Dungeon {
    round: Synced<i64>,
    loot: Synced<Vec<u64>>,
    hp: PerPlayer<i64>,
}

impl Dungeon {
    fn new() -> Self {
        Self {
            round: Synced::new(0),
            loot: Synced::new(Vec::new()),
            hp: PerPlayer::new(),
        }
    }
}

impl LandState for Dungeon {
    fn visit(&self, visitor: &mut dyn FieldVisitor) {
        visitor.field(
            "round",
            SyncMode::Broadcast,
            self.round.is_dirty(),
            FieldValue::Plain(self.round.emit()),
        );
        visitor.field(
            "loot",
            SyncMode::Broadcast,
            self.loot.is_dirty(),
            FieldValue::Plain(self.loot.emit()),
        );
        visitor.field(
            "hp",
            SyncMode::PerClient,
            self.hp.is_dirty(),
            FieldValue::PerPlayer(self.hp.emit()),
        );
    }

    fn clear_dirty(&mut self) {
        self.round.clear_dirty();
        self.loot.clear_dirty();
        self.hp.clear_dirty();
    }

    fn registered_paths(&self) -> Vec<String> {
        vec!["round".into(), "loot".into(), "hp.*".into()]
    }
}

fn dungeon_definition() -> LandDefinition<Dungeon> {
    LandDefinition::new("dungeon")
        .can_join(|_: &Dungeon, req: &JoinRequest, _| match req.player_id.clone() {
            Some(player) => JoinDecision::Allow(player),
            None => JoinDecision::Deny("anonymous".into()),
        })
        .on_join(|state, ctx| {
            let player = ctx.player_id.clone().expect("join carries a player");
            state.hp.insert(&player, 100);
            Ok(())
        })
        .on_leave(|state, ctx| {
            let player = ctx.player_id.clone().expect("leave carries a player");
            state.hp.remove(&player);
            Ok(())
        })
        .on_tick(|state, _| {
            state.round.update(|r| *r += 1);
            Ok(())
        })
        .action_with(
            "LootAction",
            vec![Arc::new(RngResolver::bounded("drop", 1000)) as Arc<dyn Resolver>],
            |state, _, ctx: &mut HandlerContext<'_>| {
                let drop = ctx
                    .resolver("drop")
                    .and_then(|v| v["value"].as_u64())
                    .unwrap_or(0);
                state.loot.update(|l| l.push(drop));
                ctx.emit("Dropped", json!({"value": drop}), EventTarget::All);
                Ok(Some(json!({"value": drop})))
            },
        )
        .action("HitAction", |state, payload, ctx| {
            let player = ctx.player_id.clone().expect("hit carries a player");
            let damage = payload["damage"].as_i64().unwrap_or(0);
            if let Some(hp) = state.hp.get_mut(&player) {
                *hp -= damage;
            }
            Ok(None)
        })
}

fn join_request(player: &str, client: &str) -> JoinRequest {
    JoinRequest {
        request_id: format!("req-{client}"),
        player_id: Some(PlayerId::new(player)),
        client_id: ClientId::new(client),
        session_id: SessionId::new(format!("sess-{client}")),
        device_id: None,
        is_guest: false,
        options: None,
        metadata: HashMap::new(),
    }
}

async fn resolve_action(
    core: &LandCore<Dungeon>,
    services: &LandServices,
    payload: &Value,
) -> BTreeMap<String, tempest::record::ResolverOutput> {
    let resolvers: Vec<Arc<dyn Resolver>> = vec![Arc::new(RngResolver::bounded("drop", 1000))];
    let snapshot: Snapshot = core.full_snapshot();
    let ctx = ResolverContext {
        land_id: core.land_id(),
        land_type: core.land_type(),
        tick_id: core.last_committed_tick_id(),
        player_id: None,
        action_payload: Some(payload),
        event_payload: None,
        current_state: &snapshot,
        services,
    };
    run_pipeline(&resolvers, &ctx).await.expect("resolvers run")
}

/// Run the live timeline: two joins, loot + hit actions interleaved with
/// ticks, one leave. Returns the record.
async fn record_live_run() -> RecordFile {
    let land_id = LandId::new("dungeon", "run-1");
    let definition = Arc::new(dungeon_definition());
    let mut core = LandCore::new(land_id, definition, Dungeon::new());
    core.initialize();

    core.join(&join_request("p1", "c1"), BTreeMap::new())
        .expect("p1 joins");
    core.join(&join_request("p2", "c2"), BTreeMap::new())
        .expect("p2 joins");
    core.tick();

    // The rng resolver draws live here; replay must reuse the recording.
    let payload = json!({});
    let outputs = resolve_action(&core, core.services(), &payload).await;
    core.apply_action(
        "LootAction",
        payload,
        InputIds {
            player_id: Some(PlayerId::new("p1")),
            client_id: Some(ClientId::new("c1")),
            session_id: None,
        },
        outputs,
    )
    .expect("loot applies");
    core.tick();

    core.apply_action(
        "HitAction",
        json!({"damage": 30}),
        InputIds {
            player_id: Some(PlayerId::new("p2")),
            client_id: Some(ClientId::new("c2")),
            session_id: None,
        },
        BTreeMap::new(),
    )
    .expect("hit applies");
    core.apply_client_event("Taunt", json!({"text": "ha"}), InputIds::default(), BTreeMap::new())
        .expect_err("Taunt is not registered");
    core.tick();

    core.leave(&PlayerId::new("p2"), &ClientId::new("c2"), BTreeMap::new());
    core.tick();

    core.into_recorder().finish()
}

#[tokio::test]
async fn reevaluation_reproduces_the_live_timeline() {
    let record = record_live_run().await;
    assert_eq!(record.max_tick_id(), 3);
    let live_hashes: BTreeMap<i64, String> = record
        .tick_frames
        .iter()
        .filter_map(|f| f.state_hash.clone().map(|h| (f.tick_id, h)))
        .collect();
    assert_eq!(live_hashes.len(), 4);

    let report = reevaluate(Arc::new(dungeon_definition()), Dungeon::new(), &record)
        .expect("replay runs");

    assert_eq!(report.max_tick_id, 3);
    assert_eq!(report.tick_hashes, live_hashes);
    assert_eq!(report.recorded_state_hashes, live_hashes);
    assert!(report.server_event_mismatches.is_empty());
    assert!(report.replay_ticks.iter().all(|t| t.is_match));
    assert_eq!(report.initial_hash_match, Some(true));
    assert!(report.is_clean());
}

#[tokio::test]
async fn record_survives_json_round_trip_before_replay() {
    let record = record_live_run().await;
    let raw = record.to_json().expect("record serializes");
    let reloaded = RecordFile::from_json(&raw).expect("record parses");
    assert_eq!(reloaded, record);

    let report = reevaluate(Arc::new(dungeon_definition()), Dungeon::new(), &reloaded)
        .expect("replay runs");
    assert!(report.is_clean());
}

#[tokio::test]
async fn tampered_record_is_reported_not_thrown() {
    let mut record = record_live_run().await;
    // Corrupt one recorded hash; replay must surface exactly that tick.
    let frame = record
        .tick_frames
        .iter_mut()
        .find(|f| f.tick_id == 2)
        .expect("tick 2 exists");
    frame.state_hash = Some("0000000000000000".into());

    let report = reevaluate(Arc::new(dungeon_definition()), Dungeon::new(), &record)
        .expect("replay still runs");
    assert!(!report.is_clean());
    let bad: Vec<i64> = report
        .replay_ticks
        .iter()
        .filter(|t| !t.is_match)
        .map(|t| t.tick_id)
        .collect();
    assert_eq!(bad, vec![2]);
}

#[tokio::test]
async fn jsonl_export_matches_replayed_snapshots() {
    let record = record_live_run().await;

    // First replay streams the JSONL export.
    let mut exporter = JsonlExporter::new(Vec::new());
    let mut export = |line: &JsonlTickLine| {
        exporter.write_tick(line).expect("ordered export");
    };
    let report = reevaluate_full(
        Arc::new(dungeon_definition()),
        Dungeon::new(),
        &record,
        None,
        Some(&mut export),
    )
    .expect("replay runs");
    assert!(report.is_clean());
    let bytes = exporter.into_inner();
    let lines = read_jsonl(bytes.as_slice()).expect("jsonl loads");
    assert_eq!(lines.len(), 4);

    // Second replay compares field-by-field against the export.
    let report = reevaluate_full(
        Arc::new(dungeon_definition()),
        Dungeon::new(),
        &record,
        Some(&lines),
        None,
    )
    .expect("replay runs");
    assert!(report.snapshot_mismatches.is_empty());
}

#[tokio::test]
async fn empty_record_steps_no_ticks() {
    let record = RecordFile {
        record_metadata: tempest::record::RecordMetadata {
            land_id: "dungeon:void".into(),
            land_type: "dungeon".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            rng_seed: tempest::determinism::rng::seed_for_land(&LandId::new("dungeon", "void")),
            initial_state_hash: None,
            version: None,
            hardware_fingerprint: None,
        },
        tick_frames: vec![],
    };
    let report = reevaluate(Arc::new(dungeon_definition()), Dungeon::new(), &record)
        .expect("replay runs");
    assert_eq!(report.max_tick_id, -1);
    assert!(report.tick_hashes.is_empty());
    assert!(report.recorded_state_hashes.is_empty());
    assert!(report.is_clean());
}

#[tokio::test]
async fn wrong_land_type_is_rejected() {
    let mut record = record_live_run().await;
    record.record_metadata.land_type = "castle".into();
    let err = reevaluate(Arc::new(dungeon_definition()), Dungeon::new(), &record).unwrap_err();
    assert!(matches!(
        err,
        tempest::record::RecordError::LandTypeMismatch { .. }
    ));
}
