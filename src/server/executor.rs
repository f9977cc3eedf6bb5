//! The per-land executor.
//!
//! One land is one serialized unit of mutation: a [`LandCore`] owning the
//! state, sessions, recorder and sync baselines, driven either by a spawned
//! task draining an in-order command queue (live mode) or directly by the
//! re-evaluator (reevaluation mode, auto loops disabled).
//!
//! Anything that can suspend, resolver pipelines above all, runs before the
//! synchronous core methods; handler bodies never await. The tick loop is
//! fixed-rate: overruns drop deadlines, never compress them. The sync loop is
//! independent of the tick loop and defaults to the tick interval when left
//! unconfigured.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use crate::api::error::WireError;
use crate::api::ident::{ClientId, LandId, PlayerId};
use crate::api::message::{EventDirection, EventMessage, StateUpdate};
use crate::determinism::clock::TickClock;
use crate::determinism::hash::hash_hex;
use crate::determinism::rng::{DeterministicRng, seed_for_land};
use crate::record::recorder::{InputIds, Recorder};
use crate::record::{InputKind, RecordMetadata, ResolverOutput};
use crate::server::context::{EmittedEvent, HandlerContext, LandContext};
use crate::server::definition::LandDefinition;
use crate::server::resolver::{LandServices, Resolver, ResolverContext, run_pipeline};
use crate::server::session::{JoinDecision, JoinRequest, PlayerSession};
use crate::state::LandState;
use crate::state::snapshot::{Snapshot, SnapshotMode, take_snapshot, to_tree};
use crate::state::sync::SyncEngine;

/// Where outbound frames go. The transport side implements this; the
/// executor stays ignorant of sockets and registries.
pub trait SyncSink: Send + Sync + 'static {
    fn push_update(&self, client: &ClientId, update: StateUpdate, events: Vec<EventMessage>);

    /// The land finished finalization; its registry entry can go away.
    fn land_closed(&self, land_id: &LandId);
}

/// A sink for lands nothing is listening to, used by tests and the
/// re-evaluator.
pub struct NullSink;

impl SyncSink for NullSink {
    fn push_update(&self, _client: &ClientId, _update: StateUpdate, _events: Vec<EventMessage>) {}
    fn land_closed(&self, _land_id: &LandId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Live,
    Reevaluation,
}

/// A server event resolved to its concrete audience.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub clients: Vec<ClientId>,
    pub event: EventMessage,
}

/// Successful join outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccepted {
    pub player_id: PlayerId,
    pub land_id: String,
    pub first_connection: bool,
    pub kicked: Option<ClientId>,
}

/// Leave outcome. Stale leaves (client id no longer current) are ignored
/// rather than errored, since they arrive routinely after a kick-old.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left { now_empty: bool },
    Ignored,
}

/// The serialized mutation core of one land.
pub struct LandCore<S: LandState> {
    context: LandContext,
    definition: Arc<LandDefinition<S>>,
    state: S,
    services: Arc<LandServices>,
    sessions: HashMap<PlayerId, PlayerSession>,
    next_tick_id: i64,
    last_committed_tick_id: i64,
    recorder: Recorder,
    sync: SyncEngine,
    mode: ExecMode,
    pending_events: Vec<RoutedEvent>,
    finalized: bool,
}

impl<S: LandState> LandCore<S> {
    pub fn new(land_id: LandId, definition: Arc<LandDefinition<S>>, state: S) -> Self {
        let seed = seed_for_land(&land_id);
        let metadata = RecordMetadata {
            land_id: land_id.canonical(),
            land_type: definition.land_type.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            rng_seed: seed,
            initial_state_hash: None,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            hardware_fingerprint: Some(std::env::consts::ARCH.to_string()),
        };
        Self::build(land_id, definition, state, metadata, ExecMode::Live)
    }

    /// A core for offline re-evaluation: auto loops never start, resolver
    /// outputs come from the record, and the RNG seed is re-derived from the
    /// land id. Metadata is carried from the original record.
    pub fn for_reevaluation(
        land_id: LandId,
        definition: Arc<LandDefinition<S>>,
        state: S,
        metadata: RecordMetadata,
    ) -> Self {
        let derived = seed_for_land(&land_id);
        if metadata.rng_seed != derived {
            log::warn!(
                "record for {} carries rng seed {}, derived seed {} wins",
                land_id,
                metadata.rng_seed,
                derived
            );
        }
        let metadata = RecordMetadata {
            rng_seed: derived,
            ..metadata
        };
        Self::build(land_id, definition, state, metadata, ExecMode::Reevaluation)
    }

    fn build(
        land_id: LandId,
        definition: Arc<LandDefinition<S>>,
        state: S,
        metadata: RecordMetadata,
        mode: ExecMode,
    ) -> Self {
        let record_hashes = definition.record_state_hashes;
        Self {
            context: LandContext {
                land_id: land_id.clone(),
                land_type: definition.land_type,
            },
            services: Arc::new(LandServices::new(DeterministicRng::from_seed(
                metadata.rng_seed,
            ))),
            definition,
            state,
            sessions: HashMap::new(),
            next_tick_id: 0,
            last_committed_tick_id: -1,
            recorder: Recorder::new(metadata, record_hashes),
            sync: SyncEngine::new(),
            mode,
            pending_events: Vec::new(),
            finalized: false,
        }
    }

    pub fn land_id(&self) -> &LandId {
        &self.context.land_id
    }

    pub fn land_type(&self) -> &'static str {
        self.context.land_type
    }

    pub fn definition(&self) -> &Arc<LandDefinition<S>> {
        &self.definition
    }

    pub fn services(&self) -> &Arc<LandServices> {
        &self.services
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn next_tick_id(&self) -> i64 {
        self.next_tick_id
    }

    pub fn last_committed_tick_id(&self) -> i64 {
        self.last_committed_tick_id
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, player: &PlayerId) -> Option<&PlayerSession> {
        self.sessions.get(player)
    }

    /// Read-only canonical view of the current state, full mode.
    pub fn full_snapshot(&self) -> Snapshot {
        take_snapshot(&self.state, &SnapshotMode::All)
    }

    /// Canonical state hash, 16 hex chars.
    pub fn state_hash(&self) -> String {
        hash_hex(&to_tree(&self.full_snapshot()))
    }

    /// Direct read access for read-only callers.
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn into_recorder(self) -> Recorder {
        self.recorder
    }

    /// Run `onInitialize` once, before any loop starts.
    pub fn initialize(&mut self) {
        if let Some(entry) = &self.definition.on_initialize {
            let outputs = BTreeMap::new();
            let mut ctx =
                HandlerContext::new(&self.context, self.last_committed_tick_id, &outputs);
            if let Err(err) = (entry.invoke)(&mut self.state, &mut ctx) {
                log::error!("{}: onInitialize failed: {err}", self.context.land_id);
            }
            let emitted = ctx.take_emitted();
            drop(ctx);
            self.process_emitted(emitted);
        }
        let hash = self.state_hash();
        self.recorder.set_initial_state_hash(hash);
    }

    /// Admission and session upsert. Resolver outputs for `canJoin` and
    /// `onJoin` are resolved by the caller and threaded in.
    pub fn join(
        &mut self,
        req: &JoinRequest,
        outputs: BTreeMap<String, ResolverOutput>,
    ) -> Result<JoinAccepted, WireError> {
        // 1. Admission predicate.
        let player_id = if let Some((_, predicate)) = &self.definition.can_join {
            let ctx = HandlerContext::new(&self.context, self.last_committed_tick_id, &outputs)
                .with_client(req.client_id.clone())
                .with_session(req.session_id.clone());
            match predicate(&self.state, req, &ctx) {
                JoinDecision::Allow(player_id) => player_id,
                JoinDecision::Deny(reason) => return Err(WireError::JoinDenied(reason)),
            }
        } else {
            req.player_id.clone().unwrap_or_else(PlayerId::random)
        };

        // 2. Capacity, skipped when the same player is reconnecting.
        let reconnecting = self.sessions.contains_key(&player_id);
        if !reconnecting
            && let Some(max) = self.definition.max_players
            && self.sessions.len() >= max
        {
            return Err(WireError::RoomFull);
        }

        // 3. Kick-old: a second join for the same player evicts the previous
        // client, observing onLeave(old) strictly before onJoin(new).
        let old_client = self
            .sessions
            .get(&player_id)
            .and_then(|session| session.client_id.clone())
            .filter(|old| *old != req.client_id);
        let mut kicked = None;
        if let Some(old_client) = old_client {
            self.leave(&player_id, &old_client, BTreeMap::new());
            kicked = Some(old_client);
        }

        // 4. Upsert the session.
        let first_connection = !self.sessions.contains_key(&player_id);
        let mut session = PlayerSession::new(player_id.clone());
        session.client_id = Some(req.client_id.clone());
        session.session_id = Some(req.session_id.clone());
        session.device_id = req.device_id.clone();
        session.is_guest = req.is_guest;
        session.metadata = req.metadata.clone();
        self.sessions.insert(player_id.clone(), session);
        self.sync
            .register_client(req.client_id.clone(), player_id.clone());

        self.recorder.append_input(
            InputKind::Lifecycle,
            "join",
            json!({
                "playerId": player_id,
                "clientId": req.client_id,
                "sessionId": req.session_id,
                "deviceId": req.device_id,
                "isGuest": req.is_guest,
                "metadata": req.metadata,
                "options": req.options,
            }),
            InputIds {
                player_id: Some(player_id.clone()),
                client_id: Some(req.client_id.clone()),
                session_id: Some(req.session_id.clone()),
            },
            outputs.clone(),
            self.last_committed_tick_id,
        );

        // 5. First connection runs the join handler.
        if first_connection {
            self.run_lifecycle_handler("onJoin", &player_id, &req.client_id, &outputs);
        }

        Ok(JoinAccepted {
            player_id,
            land_id: self.context.land_id.canonical(),
            first_connection,
            kicked,
        })
    }

    /// Leave requires the client id to still be current; anything else is a
    /// stale echo and is ignored.
    pub fn leave(
        &mut self,
        player_id: &PlayerId,
        client_id: &ClientId,
        outputs: BTreeMap<String, ResolverOutput>,
    ) -> LeaveOutcome {
        match self.sessions.get(player_id) {
            Some(session) if session.client_id.as_ref() == Some(client_id) => {}
            _ => return LeaveOutcome::Ignored,
        }

        self.run_lifecycle_handler("onLeave", player_id, client_id, &outputs);

        self.recorder.append_input(
            InputKind::Lifecycle,
            "leave",
            json!({ "playerId": player_id, "clientId": client_id }),
            InputIds {
                player_id: Some(player_id.clone()),
                client_id: Some(client_id.clone()),
                session_id: None,
            },
            outputs,
            self.last_committed_tick_id,
        );

        self.sync.drop_client(client_id);
        self.sessions.remove(player_id);
        LeaveOutcome::Left {
            now_empty: self.sessions.is_empty(),
        }
    }

    fn run_lifecycle_handler(
        &mut self,
        which: &str,
        player_id: &PlayerId,
        client_id: &ClientId,
        outputs: &BTreeMap<String, ResolverOutput>,
    ) {
        let entry = match which {
            "onJoin" => self.definition.on_join.as_ref(),
            "onLeave" => self.definition.on_leave.as_ref(),
            _ => None,
        };
        let Some(entry) = entry else { return };
        let mut ctx = HandlerContext::new(&self.context, self.last_committed_tick_id, outputs)
            .with_player(player_id.clone())
            .with_client(client_id.clone());
        if let Err(err) = (entry.invoke)(&mut self.state, &mut ctx) {
            log::error!("{}: {which} failed: {err}", self.context.land_id);
        }
        let emitted = ctx.take_emitted();
        drop(ctx);
        self.process_emitted(emitted);
    }

    /// Dispatch one action. The payload is already decoded and the entry's
    /// resolver outputs already resolved (or replayed).
    pub fn apply_action(
        &mut self,
        identifier: &str,
        payload: Value,
        ids: InputIds,
        outputs: BTreeMap<String, ResolverOutput>,
    ) -> Result<Option<Value>, WireError> {
        if self.definition.find_action(identifier).is_none() {
            return Err(WireError::ActionNotRegistered(identifier.to_string()));
        }

        self.recorder.append_input(
            InputKind::Action,
            identifier,
            payload.clone(),
            ids.clone(),
            outputs.clone(),
            self.last_committed_tick_id,
        );

        let mut ctx = HandlerContext::new(&self.context, self.last_committed_tick_id, &outputs);
        ctx.player_id = ids.player_id;
        ctx.client_id = ids.client_id;
        ctx.session_id = ids.session_id;
        let result = {
            // Checked above; a vanished entry here would be a table bug.
            let Some(entry) = self.definition.find_action(identifier) else {
                return Err(WireError::ActionNotRegistered(identifier.to_string()));
            };
            (entry.invoke)(&mut self.state, payload, &mut ctx)
        };
        let emitted = ctx.take_emitted();
        drop(ctx);

        match result {
            Ok(response) => {
                self.process_emitted(emitted);
                Ok(response)
            }
            Err(err) => Err(WireError::HandlerFailure(err.message)),
        }
    }

    /// Dispatch one client event: every registered handler for the name, in
    /// registration order, inside a single mutation region.
    pub fn apply_client_event(
        &mut self,
        name: &str,
        payload: Value,
        ids: InputIds,
        outputs: BTreeMap<String, ResolverOutput>,
    ) -> Result<(), WireError> {
        if !self.definition.is_event_registered(name) {
            return Err(WireError::EventNotRegistered(name.to_string()));
        }

        self.recorder.append_input(
            InputKind::ClientEvent,
            name,
            payload.clone(),
            ids.clone(),
            outputs.clone(),
            self.last_committed_tick_id,
        );

        let mut ctx = HandlerContext::new(&self.context, self.last_committed_tick_id, &outputs);
        ctx.player_id = ids.player_id;
        ctx.client_id = ids.client_id;
        ctx.session_id = ids.session_id;
        let result = {
            let Some(handlers) = self.definition.events.get(name) else {
                return Err(WireError::EventNotRegistered(name.to_string()));
            };
            let mut result = Ok(());
            for handler in handlers {
                if let Err(err) = handler(&mut self.state, &payload, &mut ctx) {
                    result = Err(err);
                    break;
                }
            }
            result
        };
        let emitted = ctx.take_emitted();
        drop(ctx);

        match result {
            Ok(()) => {
                self.process_emitted(emitted);
                Ok(())
            }
            Err(err) => Err(WireError::HandlerFailure(err.message)),
        }
    }

    /// Execute one tick: assign the id, run the tick handler bound to it,
    /// commit. Returns the committed tick id.
    pub fn tick(&mut self) -> i64 {
        let tick_id = self.next_tick_id;
        self.next_tick_id += 1;

        if let Some(entry) = &self.definition.on_tick {
            let outputs = BTreeMap::new();
            // The tick handler binds to the tick being executed, and events
            // it emits carry that tick.
            let mut ctx = HandlerContext::new(&self.context, tick_id, &outputs);
            if let Err(err) = (entry.invoke)(&mut self.state, &mut ctx) {
                log::error!("{}: tick {tick_id} handler failed: {err}", self.context.land_id);
            }
            let emitted = ctx.take_emitted();
            drop(ctx);
            self.process_emitted(emitted);
        }

        self.last_committed_tick_id = tick_id;
        let hash = if self.definition.record_state_hashes {
            Some(self.state_hash())
        } else {
            None
        };
        self.recorder.commit_tick(tick_id, hash);
        tick_id
    }

    /// One tick step for the re-evaluator. Identical to the live tick; the
    /// difference is only who calls it.
    pub fn step_tick_once(&mut self) -> i64 {
        self.tick()
    }

    /// Full sync pass. Returns one update per tracked client with the server
    /// events addressed to it; baselines advance, pending events drain.
    pub fn run_sync(&mut self) -> Vec<(ClientId, StateUpdate, Vec<EventMessage>)> {
        if let Some(callback) = &self.definition.on_sync {
            callback(&self.state);
        }
        let dirty = self.definition.dirty_tracking;
        let updates = self.sync.sync_all(&self.state, dirty);
        self.sync.end_sync(&mut self.state, dirty);
        self.attach_pending(updates)
    }

    /// Broadcast-only pass, used after a leave: only shared state changed.
    pub fn run_sync_broadcast_only(&mut self) -> Vec<(ClientId, StateUpdate, Vec<EventMessage>)> {
        let updates = self.sync.sync_broadcast_only(&self.state);
        self.attach_pending(updates)
    }

    fn attach_pending(
        &mut self,
        updates: Vec<(ClientId, StateUpdate)>,
    ) -> Vec<(ClientId, StateUpdate, Vec<EventMessage>)> {
        let pending = std::mem::take(&mut self.pending_events);
        updates
            .into_iter()
            .map(|(client, update)| {
                let events = pending
                    .iter()
                    .filter(|routed| routed.clients.contains(&client))
                    .map(|routed| routed.event.clone())
                    .collect();
                (client, update, events)
            })
            .collect()
    }

    /// Events emitted but not yet flushed by a sync.
    pub fn take_pending_events(&mut self) -> Vec<RoutedEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn process_emitted(&mut self, emitted: Vec<EmittedEvent>) {
        for event in emitted {
            self.recorder
                .append_server_event(&event.name, event.payload.clone(), event.target.clone());
            let clients = self.route_target(&event.target);
            self.pending_events.push(RoutedEvent {
                clients,
                event: EventMessage {
                    direction: EventDirection::FromServer,
                    name: event.name,
                    payload: event.payload,
                },
            });
        }
    }

    fn route_target(&self, target: &crate::api::message::EventTarget) -> Vec<ClientId> {
        use crate::api::message::EventTarget;
        match target {
            EventTarget::All => self
                .sessions
                .values()
                .filter_map(|s| s.client_id.clone())
                .collect(),
            EventTarget::Player(player) => self
                .sessions
                .get(player)
                .and_then(|s| s.client_id.clone())
                .into_iter()
                .collect(),
            EventTarget::Client(client) => vec![client.clone()],
            EventTarget::Session(session) => self
                .sessions
                .values()
                .filter(|s| s.session_id.as_ref() == Some(session))
                .filter_map(|s| s.client_id.clone())
                .collect(),
            EventTarget::List(players) => players
                .iter()
                .filter_map(|p| self.sessions.get(p).and_then(|s| s.client_id.clone()))
                .collect(),
        }
    }

    /// Finalization. Tick and sync loops are already stopped when this runs,
    /// so no tick can commit past this point. Errors are logged, never
    /// propagated: nothing may block finalization.
    pub fn shutdown(&mut self) -> Vec<RoutedEvent> {
        if self.finalized {
            return Vec::new();
        }
        self.finalized = true;

        if self.sessions.is_empty()
            && let Some(entry) = &self.definition.on_destroy_when_empty
        {
            let outputs = BTreeMap::new();
            let mut ctx =
                HandlerContext::new(&self.context, self.last_committed_tick_id, &outputs);
            if let Err(err) = (entry.invoke)(&mut self.state, &mut ctx) {
                log::error!("{}: onDestroyWhenEmpty failed: {err}", self.context.land_id);
            }
            let emitted = ctx.take_emitted();
            drop(ctx);
            self.process_emitted(emitted);
        }

        if let Some(entry) = &self.definition.on_finalize {
            let outputs = BTreeMap::new();
            let mut ctx =
                HandlerContext::new(&self.context, self.last_committed_tick_id, &outputs);
            if let Err(err) = (entry.invoke)(&mut self.state, &mut ctx) {
                log::error!("{}: onFinalize failed: {err}", self.context.land_id);
            }
            let emitted = ctx.take_emitted();
            drop(ctx);
            self.process_emitted(emitted);
        }

        self.take_pending_events()
    }

    /// Replay one recorded lifecycle event. Admission was adjudicated live;
    /// replay re-applies only accepted transitions.
    pub fn apply_recorded_lifecycle(&mut self, input: &crate::record::RecordedInput) {
        match input.type_identifier.as_str() {
            "join" => {
                let payload = &input.payload;
                let Some(player_id) = input.player_id.clone() else {
                    return;
                };
                let client_id = input.client_id.clone().unwrap_or_else(ClientId::random);
                let first_connection = !self.sessions.contains_key(&player_id);
                let mut session = PlayerSession::new(player_id.clone());
                session.client_id = Some(client_id.clone());
                session.session_id = input.session_id.clone();
                session.is_guest = payload["isGuest"].as_bool().unwrap_or(false);
                if let Some(device) = payload["deviceId"].as_str() {
                    session.device_id = Some(crate::api::ident::DeviceId::new(device));
                }
                if let Some(metadata) = payload["metadata"].as_object() {
                    session.metadata = metadata
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect();
                }
                self.sessions.insert(player_id.clone(), session);
                self.sync.register_client(client_id.clone(), player_id.clone());
                self.recorder.append_input(
                    InputKind::Lifecycle,
                    "join",
                    input.payload.clone(),
                    InputIds {
                        player_id: Some(player_id.clone()),
                        client_id: Some(client_id.clone()),
                        session_id: input.session_id.clone(),
                    },
                    input.resolver_outputs.clone(),
                    self.last_committed_tick_id,
                );
                if first_connection {
                    self.run_lifecycle_handler(
                        "onJoin",
                        &player_id,
                        &client_id,
                        &input.resolver_outputs,
                    );
                }
            }
            "leave" => {
                let (Some(player_id), Some(client_id)) =
                    (input.player_id.clone(), input.client_id.clone())
                else {
                    return;
                };
                self.leave(&player_id, &client_id, input.resolver_outputs.clone());
            }
            other => {
                log::warn!("unknown lifecycle record `{other}` skipped");
            }
        }
    }
}

// ---- live executor ----

enum Command {
    Join {
        req: JoinRequest,
        reply: oneshot::Sender<Result<JoinAccepted, WireError>>,
    },
    Leave {
        player_id: PlayerId,
        client_id: ClientId,
    },
    Action {
        ids: InputIds,
        identifier: String,
        payload: Value,
        reply: oneshot::Sender<Result<Option<Value>, WireError>>,
    },
    ClientEvent {
        ids: InputIds,
        name: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), WireError>>,
    },
    Query {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown,
}

/// Cheap clonable handle to a spawned land executor.
#[derive(Clone, Debug)]
pub struct LandHandle {
    land_id: LandId,
    land_type: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl LandHandle {
    pub fn land_id(&self) -> &LandId {
        &self.land_id
    }

    pub fn land_type(&self) -> &str {
        &self.land_type
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn join(&self, req: JoinRequest) -> Result<JoinAccepted, WireError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Join { req, reply })
            .map_err(|_| land_closed())?;
        rx.await.map_err(|_| land_closed())?
    }

    pub fn leave(&self, player_id: PlayerId, client_id: ClientId) {
        let _ = self.tx.send(Command::Leave {
            player_id,
            client_id,
        });
    }

    pub async fn action(
        &self,
        ids: InputIds,
        identifier: String,
        payload: Value,
    ) -> Result<Option<Value>, WireError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Action {
                ids,
                identifier,
                payload,
                reply,
            })
            .map_err(|_| land_closed())?;
        rx.await.map_err(|_| land_closed())?
    }

    pub async fn client_event(
        &self,
        ids: InputIds,
        name: String,
        payload: Value,
    ) -> Result<(), WireError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ClientEvent {
                ids,
                name,
                payload,
                reply,
            })
            .map_err(|_| land_closed())?;
        rx.await.map_err(|_| land_closed())?
    }

    /// Read-only full-mode snapshot of the current state.
    pub async fn current_state(&self) -> Result<Snapshot, WireError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Query { reply })
            .map_err(|_| land_closed())?;
        rx.await.map_err(|_| land_closed())
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

fn land_closed() -> WireError {
    WireError::InternalError("land is gone".to_string())
}

/// Spawn the serialized executor task for one land.
pub fn spawn<S: LandState>(
    land_id: LandId,
    definition: Arc<LandDefinition<S>>,
    state: S,
    sink: Arc<dyn SyncSink>,
) -> LandHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = LandHandle {
        land_id: land_id.clone(),
        land_type: definition.land_type.to_string(),
        tx,
    };
    tokio::spawn(run_executor(land_id, definition, state, sink, rx));
    handle
}

async fn run_executor<S: LandState>(
    land_id: LandId,
    definition: Arc<LandDefinition<S>>,
    state: S,
    sink: Arc<dyn SyncSink>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut core = LandCore::new(land_id.clone(), Arc::clone(&definition), state);
    core.initialize();

    let started = Instant::now();
    let mut tick_clock = TickClock::new(started, definition.tick_interval);
    let sync_interval = definition.sync_interval.unwrap_or_else(|| {
        log::warn!(
            "{land_id}: no sync interval configured, binding sync to the tick interval ({:?})",
            definition.tick_interval
        );
        definition.tick_interval
    });
    let mut sync_clock = TickClock::new(started, sync_interval);

    // Armed whenever the land is empty and a destroy delay is configured.
    let mut destroy_at: Option<Instant> = definition
        .destroy_when_empty_after
        .map(|delay| Instant::now() + delay);

    loop {
        let destroy_deadline = destroy_at.unwrap_or_else(Instant::now);
        tokio::select! {
            command = rx.recv() => match command {
                None => break,
                Some(Command::Join { req, reply }) => {
                    let result = handle_join(&mut core, &req).await;
                    if result.is_ok() {
                        destroy_at = None;
                    }
                    if let Ok(JoinAccepted { kicked: Some(_), .. }) = &result {
                        // The evicted client's departure only touched shared
                        // state; a broadcast-only pass covers it.
                        flush(&sink, core.run_sync_broadcast_only());
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Leave { player_id, client_id }) => {
                    let outputs = match resolve_for(&core, core.definition().on_leave.as_ref().map(|e| e.resolvers.as_slice()).unwrap_or(&[]), Some(&player_id), None, None).await {
                        Ok(outputs) => outputs,
                        Err(err) => {
                            log::error!("{land_id}: onLeave resolvers failed: {err}");
                            BTreeMap::new()
                        }
                    };
                    if let LeaveOutcome::Left { now_empty } = core.leave(&player_id, &client_id, outputs) {
                        flush(&sink, core.run_sync_broadcast_only());
                        if now_empty && let Some(delay) = definition.destroy_when_empty_after {
                            destroy_at = Some(Instant::now() + delay);
                        }
                    }
                }
                Some(Command::Action { ids, identifier, payload, reply }) => {
                    let result = handle_action(&mut core, ids, &identifier, payload).await;
                    let _ = reply.send(result);
                }
                Some(Command::ClientEvent { ids, name, payload, reply }) => {
                    let result = core.apply_client_event(&name, payload, ids, BTreeMap::new());
                    let _ = reply.send(result);
                }
                Some(Command::Query { reply }) => {
                    let _ = reply.send(core.full_snapshot());
                }
                Some(Command::Shutdown) => break,
            },
            _ = tokio::time::sleep_until(tick_clock.next_deadline().into()) => {
                core.tick();
                tick_clock.advance();
                // One tick per wake; overrun deadlines are dropped.
                tick_clock.catch_up(Instant::now());
            }
            _ = tokio::time::sleep_until(sync_clock.next_deadline().into()) => {
                flush(&sink, core.run_sync());
                sync_clock.advance();
                sync_clock.catch_up(Instant::now());
            }
            _ = tokio::time::sleep_until(destroy_deadline.into()), if destroy_at.is_some() => {
                if core.is_empty() {
                    break;
                }
                destroy_at = None;
            }
        }
    }

    // Loops are stopped by falling out of the select; nothing can commit a
    // tick past this point.
    let leftovers = core.shutdown();
    for routed in leftovers {
        for client in &routed.clients {
            sink.push_update(client, StateUpdate::no_change(), vec![routed.event.clone()]);
        }
    }
    if let Some(after) = &definition.after_finalize {
        after().await;
    }
    sink.land_closed(&land_id);
}

fn flush(sink: &Arc<dyn SyncSink>, updates: Vec<(ClientId, StateUpdate, Vec<EventMessage>)>) {
    for (client, update, events) in updates {
        sink.push_update(&client, update, events);
    }
}

async fn handle_join<S: LandState>(
    core: &mut LandCore<S>,
    req: &JoinRequest,
) -> Result<JoinAccepted, WireError> {
    // canJoin and onJoin resolver outputs merge into one map; names are
    // distinct per declaration.
    let mut resolvers: Vec<Arc<dyn Resolver>> = Vec::new();
    if let Some((can_join_resolvers, _)) = &core.definition().can_join {
        resolvers.extend(can_join_resolvers.iter().cloned());
    }
    if let Some(entry) = &core.definition().on_join {
        resolvers.extend(entry.resolvers.iter().cloned());
    }
    let outputs = resolve_for(core, &resolvers, req.player_id.as_ref(), None, None)
        .await
        .map_err(|err| WireError::ResolverFailure(err.name))?;
    core.join(req, outputs)
}

async fn handle_action<S: LandState>(
    core: &mut LandCore<S>,
    ids: InputIds,
    identifier: &str,
    payload: Value,
) -> Result<Option<Value>, WireError> {
    let resolvers = match core.definition().find_action(identifier) {
        Some(entry) => entry.resolvers.clone(),
        None => return Err(WireError::ActionNotRegistered(identifier.to_string())),
    };
    let outputs = resolve_for(core, &resolvers, ids.player_id.as_ref(), Some(&payload), None)
        .await
        .map_err(|err| WireError::ResolverFailure(err.name))?;
    core.apply_action(identifier, payload, ids, outputs)
}

async fn resolve_for<S: LandState>(
    core: &LandCore<S>,
    resolvers: &[Arc<dyn Resolver>],
    player_id: Option<&PlayerId>,
    action_payload: Option<&Value>,
    event_payload: Option<&Value>,
) -> Result<BTreeMap<String, ResolverOutput>, crate::server::error::ResolverError> {
    if resolvers.is_empty() {
        return Ok(BTreeMap::new());
    }
    let snapshot = core.full_snapshot();
    let ctx = ResolverContext {
        land_id: core.land_id(),
        land_type: core.land_type(),
        tick_id: core.last_committed_tick_id(),
        player_id,
        action_payload,
        event_payload,
        current_state: &snapshot,
        services: core.services(),
    };
    run_pipeline(resolvers, &ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ident::SessionId;
    use crate::server::session::JoinDecision;
    use crate::state::{FieldValue, FieldVisitor, PerPlayer, Synced, SyncMode};
    use std::sync::Mutex;

    struct Arena {
        round: Synced<i64>,
        joins: Synced<i64>,
        hands: PerPlayer<Vec<i64>>,
    }

    impl Arena {
        fn new() -> Self {
            Self {
                round: Synced::new(0),
                joins: Synced::new(0),
                hands: PerPlayer::new(),
            }
        }
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
                "joins",
                SyncMode::Broadcast,
                self.joins.is_dirty(),
                FieldValue::Plain(self.joins.emit()),
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
            self.joins.clear_dirty();
            self.hands.clear_dirty();
        }

        fn registered_paths(&self) -> Vec<String> {
            vec!["round".into(), "joins".into(), "hands.*".into()]
        }
    }

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn logged_definition(calls: CallLog) -> LandDefinition<Arena> {
        let join_log = Arc::clone(&calls);
        let leave_log = Arc::clone(&calls);
        LandDefinition::new("arena")
            .max_players(2)
            .can_join(|_: &Arena, req, _| {
                match req.player_id.clone() {
                    Some(player) => JoinDecision::Allow(player),
                    None => JoinDecision::Deny("player identity required".into()),
                }
            })
            .on_join(move |state, ctx| {
                state.joins.update(|j| *j += 1);
                let player = ctx.player_id.clone().expect("join has a player");
                state.hands.insert(&player, vec![]);
                let client = ctx.client_id.clone().expect("join has a client");
                join_log
                    .lock()
                    .unwrap()
                    .push(format!("onJoin({},{})", player, client));
                Ok(())
            })
            .on_leave(move |state, ctx| {
                let player = ctx.player_id.clone().expect("leave has a player");
                state.hands.remove(&player);
                let client = ctx.client_id.clone().expect("leave has a client");
                leave_log
                    .lock()
                    .unwrap()
                    .push(format!("onLeave({},{})", player, client));
                Ok(())
            })
            .on_tick(|state, _| {
                state.round.update(|r| *r += 1);
                Ok(())
            })
            .action("MoveAction", |state, payload, ctx| {
                let delta = payload["delta"].as_i64().unwrap_or(0);
                state.round.update(|r| *r += delta);
                ctx.emit(
                    "Moved",
                    json!({"delta": delta}),
                    crate::api::message::EventTarget::All,
                );
                Ok(Some(json!({"round": *state.round.get()})))
            })
            .on_event("Nudge", |state, _, _| {
                state.round.update(|r| *r += 10);
                Ok(())
            })
    }

    fn join_request(player: &str, client: &str) -> JoinRequest {
        JoinRequest {
            request_id: format!("req-{client}"),
            player_id: Some(PlayerId::new(player)),
            client_id: ClientId::new(client),
            session_id: SessionId::new(format!("s-{client}")),
            device_id: None,
            is_guest: false,
            options: None,
            metadata: HashMap::new(),
        }
    }

    fn core_with(calls: CallLog) -> LandCore<Arena> {
        let definition = Arc::new(logged_definition(calls));
        let mut core = LandCore::new(LandId::new("arena", "m1"), definition, Arena::new());
        core.initialize();
        core
    }

    #[test]
    fn tick_counters_advance_in_lockstep() {
        let mut core = core_with(Arc::new(Mutex::new(Vec::new())));
        assert_eq!(core.last_committed_tick_id(), -1);
        assert_eq!(core.next_tick_id(), 0);
        for expected in 0..3 {
            let tick = core.tick();
            assert_eq!(tick, expected);
            assert_eq!(core.last_committed_tick_id(), expected);
            assert_eq!(core.next_tick_id(), expected + 1);
        }
    }

    #[test]
    fn kick_old_orders_leave_before_join() {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut core = core_with(Arc::clone(&calls));

        let first = core
            .join(&join_request("p1", "c1"), BTreeMap::new())
            .unwrap();
        assert!(first.first_connection);
        assert_eq!(first.kicked, None);

        let second = core
            .join(&join_request("p1", "c2"), BTreeMap::new())
            .unwrap();
        assert_eq!(second.kicked, Some(ClientId::new("c1")));
        // The old session was dropped first, so this is again a first
        // connection and onJoin runs.
        assert!(second.first_connection);

        let log = calls.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "onJoin(p1,c1)".to_string(),
                "onLeave(p1,c1)".to_string(),
                "onJoin(p1,c2)".to_string(),
            ]
        );
        drop(log);
        assert_eq!(core.player_count(), 1);
        assert_eq!(
            core.session(&PlayerId::new("p1")).unwrap().client_id,
            Some(ClientId::new("c2"))
        );
    }

    #[test]
    fn room_full_spares_reconnects() {
        let mut core = core_with(Arc::new(Mutex::new(Vec::new())));
        core.join(&join_request("p1", "c1"), BTreeMap::new()).unwrap();
        core.join(&join_request("p2", "c2"), BTreeMap::new()).unwrap();

        let third = core.join(&join_request("p3", "c3"), BTreeMap::new());
        assert_eq!(third.unwrap_err(), WireError::RoomFull);

        // p2 reconnecting under a new client bypasses the capacity check.
        let reconnect = core.join(&join_request("p2", "c9"), BTreeMap::new()).unwrap();
        assert_eq!(reconnect.kicked, Some(ClientId::new("c2")));
    }

    #[test]
    fn stale_leave_is_ignored() {
        let mut core = core_with(Arc::new(Mutex::new(Vec::new())));
        core.join(&join_request("p1", "c1"), BTreeMap::new()).unwrap();
        core.join(&join_request("p1", "c2"), BTreeMap::new()).unwrap();

        // The transport for c1 reports its disconnect after the kick.
        let outcome = core.leave(&PlayerId::new("p1"), &ClientId::new("c1"), BTreeMap::new());
        assert_eq!(outcome, LeaveOutcome::Ignored);
        assert_eq!(core.player_count(), 1);

        let outcome = core.leave(&PlayerId::new("p1"), &ClientId::new("c2"), BTreeMap::new());
        assert_eq!(outcome, LeaveOutcome::Left { now_empty: true });
    }

    #[test]
    fn action_dispatch_and_response() {
        let mut core = core_with(Arc::new(Mutex::new(Vec::new())));
        core.join(&join_request("p1", "c1"), BTreeMap::new()).unwrap();

        let response = core
            .apply_action(
                "move",
                json!({"delta": 5}),
                InputIds {
                    player_id: Some(PlayerId::new("p1")),
                    client_id: Some(ClientId::new("c1")),
                    session_id: None,
                },
                BTreeMap::new(),
            )
            .unwrap();
        assert_eq!(response, Some(json!({"round": 5})));

        let missing = core.apply_action(
            "Teleport",
            Value::Null,
            InputIds::default(),
            BTreeMap::new(),
        );
        assert_eq!(
            missing.unwrap_err(),
            WireError::ActionNotRegistered("Teleport".to_string())
        );
    }

    #[test]
    fn unregistered_event_is_rejected() {
        let mut core = core_with(Arc::new(Mutex::new(Vec::new())));
        let err = core
            .apply_client_event("Wave", Value::Null, InputIds::default(), BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, WireError::EventNotRegistered("Wave".to_string()));

        core.apply_client_event("Nudge", Value::Null, InputIds::default(), BTreeMap::new())
            .unwrap();
        assert_eq!(*core.state().round.get(), 10);
    }

    #[test]
    fn emitted_events_ride_the_next_sync() {
        let mut core = core_with(Arc::new(Mutex::new(Vec::new())));
        core.join(&join_request("p1", "c1"), BTreeMap::new()).unwrap();
        core.apply_action(
            "MoveAction",
            json!({"delta": 1}),
            InputIds {
                player_id: Some(PlayerId::new("p1")),
                client_id: Some(ClientId::new("c1")),
                session_id: None,
            },
            BTreeMap::new(),
        )
        .unwrap();

        let updates = core.run_sync();
        assert_eq!(updates.len(), 1);
        let (client, update, events) = &updates[0];
        assert_eq!(client, &ClientId::new("c1"));
        assert_eq!(update.kind, crate::api::message::StateUpdateKind::FirstSync);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Moved");

        // Drained: the next sync carries no stale events.
        let updates = core.run_sync();
        assert!(updates[0].2.is_empty());
    }

    #[test]
    fn handler_error_becomes_failure_frame_and_spares_the_land() {
        let definition = Arc::new(
            LandDefinition::<Arena>::new("arena").action("ExplodeAction", |_, _, _| {
                Err(crate::server::error::HandlerError::new("boom"))
            }),
        );
        let mut core = LandCore::new(LandId::new("arena", "m1"), definition, Arena::new());
        core.initialize();

        let err = core
            .apply_action("explode", Value::Null, InputIds::default(), BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, WireError::HandlerFailure("boom".to_string()));
        // The land keeps ticking.
        assert_eq!(core.tick(), 0);
    }

    #[tokio::test]
    async fn spawned_executor_ticks_and_answers_queries() {
        let definition = Arc::new(
            logged_definition(Arc::new(Mutex::new(Vec::new())))
                .tick_interval(std::time::Duration::from_millis(10))
                .sync_interval(std::time::Duration::from_millis(10)),
        );
        let handle = spawn(
            LandId::new("arena", "live"),
            definition,
            Arena::new(),
            Arc::new(NullSink),
        );

        handle.join(join_request("p1", "c1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(55)).await;

        let snapshot = handle.current_state().await.unwrap();
        let round = snapshot["round"].as_i64().unwrap();
        assert!(round >= 3, "expected several ticks, saw round {round}");

        let response = handle
            .action(
                InputIds {
                    player_id: Some(PlayerId::new("p1")),
                    client_id: Some(ClientId::new("c1")),
                    session_id: None,
                },
                "MoveAction".into(),
                json!({"delta": 100}),
            )
            .await
            .unwrap();
        assert!(response.unwrap()["round"].as_i64().unwrap() >= 103);

        handle.shutdown();
    }
}
