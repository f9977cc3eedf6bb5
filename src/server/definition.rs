//! Land definitions: tick settings, lifecycle hooks and handler tables.
//!
//! Handlers are stored erased: each entry keeps the declared type name, the
//! derived schema action id and a boxed invoke closure, so dispatch is plain
//! string comparison with no reflection at call time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::api::codec::EventSchemaTable;
use crate::server::context::HandlerContext;
use crate::server::error::HandlerError;
use crate::server::resolver::Resolver;
use crate::server::session::{JoinDecision, JoinRequest};
use crate::state::LandState;

pub type ActionFn<S> = Box<
    dyn Fn(&mut S, Value, &mut HandlerContext<'_>) -> Result<Option<Value>, HandlerError>
        + Send
        + Sync,
>;
pub type EventFn<S> =
    Box<dyn Fn(&mut S, &Value, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync>;
pub type LifecycleFn<S> =
    Box<dyn Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync>;
pub type ReadOnlyFn<S> = Box<dyn Fn(&S) + Send + Sync>;
pub type CanJoinFn<S> =
    Box<dyn Fn(&S, &JoinRequest, &HandlerContext<'_>) -> JoinDecision + Send + Sync>;
pub type AfterFinalizeFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) struct ActionEntry<S> {
    pub type_name: String,
    pub last_name: String,
    pub schema_id: String,
    pub resolvers: Vec<Arc<dyn Resolver>>,
    pub invoke: ActionFn<S>,
}

pub(crate) struct LifecycleEntry<S> {
    pub resolvers: Vec<Arc<dyn Resolver>>,
    pub invoke: LifecycleFn<S>,
}

/// Schema action id: the last name component, `Action` suffix stripped,
/// first character lowered. `game::MoveFastAction` becomes `moveFast`.
fn schema_action_id(type_name: &str) -> String {
    let last = last_component(type_name);
    let stripped = last.strip_suffix("Action").filter(|s| !s.is_empty()).unwrap_or(last);
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn last_component(type_name: &str) -> &str {
    type_name
        .rsplit("::")
        .next()
        .and_then(|s| s.rsplit('.').next())
        .unwrap_or(type_name)
}

/// Declaration of one land type.
pub struct LandDefinition<S: LandState> {
    pub(crate) land_type: &'static str,
    pub(crate) tick_interval: Duration,
    pub(crate) sync_interval: Option<Duration>,
    pub(crate) max_players: Option<usize>,
    pub(crate) destroy_when_empty_after: Option<Duration>,
    pub(crate) record_state_hashes: bool,
    pub(crate) dirty_tracking: bool,
    pub(crate) on_initialize: Option<LifecycleEntry<S>>,
    pub(crate) can_join: Option<(Vec<Arc<dyn Resolver>>, CanJoinFn<S>)>,
    pub(crate) on_join: Option<LifecycleEntry<S>>,
    pub(crate) on_leave: Option<LifecycleEntry<S>>,
    pub(crate) on_tick: Option<LifecycleEntry<S>>,
    pub(crate) on_sync: Option<ReadOnlyFn<S>>,
    pub(crate) on_destroy_when_empty: Option<LifecycleEntry<S>>,
    pub(crate) on_finalize: Option<LifecycleEntry<S>>,
    pub(crate) after_finalize: Option<AfterFinalizeFn>,
    pub(crate) actions: Vec<ActionEntry<S>>,
    pub(crate) events: HashMap<String, Vec<EventFn<S>>>,
    pub(crate) event_fields: HashMap<String, Vec<String>>,
}

impl<S: LandState> LandDefinition<S> {
    pub fn new(land_type: &'static str) -> Self {
        Self {
            land_type,
            tick_interval: Duration::from_millis(50),
            sync_interval: None,
            max_players: None,
            destroy_when_empty_after: None,
            record_state_hashes: true,
            dirty_tracking: false,
            on_initialize: None,
            can_join: None,
            on_join: None,
            on_leave: None,
            on_tick: None,
            on_sync: None,
            on_destroy_when_empty: None,
            on_finalize: None,
            after_finalize: None,
            actions: Vec::new(),
            events: HashMap::new(),
            event_fields: HashMap::new(),
        }
    }

    pub fn land_type(&self) -> &'static str {
        self.land_type
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    pub fn max_players(mut self, max: usize) -> Self {
        self.max_players = Some(max);
        self
    }

    pub fn destroy_when_empty_after(mut self, delay: Duration) -> Self {
        self.destroy_when_empty_after = Some(delay);
        self
    }

    pub fn record_state_hashes(mut self, enabled: bool) -> Self {
        self.record_state_hashes = enabled;
        self
    }

    /// Opt into the dirty-tracking fast path: sync passes walk only dirty
    /// subtrees and clear marks afterwards.
    pub fn dirty_tracking(mut self, enabled: bool) -> Self {
        self.dirty_tracking = enabled;
        self
    }

    pub fn on_initialize<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_initialize = Some(LifecycleEntry {
            resolvers: Vec::new(),
            invoke: Box::new(handler),
        });
        self
    }

    pub fn can_join<F>(self, predicate: F) -> Self
    where
        F: Fn(&S, &JoinRequest, &HandlerContext<'_>) -> JoinDecision + Send + Sync + 'static,
    {
        self.can_join_with(Vec::new(), predicate)
    }

    pub fn can_join_with<F>(mut self, resolvers: Vec<Arc<dyn Resolver>>, predicate: F) -> Self
    where
        F: Fn(&S, &JoinRequest, &HandlerContext<'_>) -> JoinDecision + Send + Sync + 'static,
    {
        self.can_join = Some((resolvers, Box::new(predicate)));
        self
    }

    pub fn on_join<F>(self, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_join_with(Vec::new(), handler)
    }

    pub fn on_join_with<F>(mut self, resolvers: Vec<Arc<dyn Resolver>>, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_join = Some(LifecycleEntry {
            resolvers,
            invoke: Box::new(handler),
        });
        self
    }

    pub fn on_leave<F>(self, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_leave_with(Vec::new(), handler)
    }

    pub fn on_leave_with<F>(mut self, resolvers: Vec<Arc<dyn Resolver>>, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_leave = Some(LifecycleEntry {
            resolvers,
            invoke: Box::new(handler),
        });
        self
    }

    pub fn on_tick<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_tick = Some(LifecycleEntry {
            resolvers: Vec::new(),
            invoke: Box::new(handler),
        });
        self
    }

    /// Read-only callback before each delta push.
    pub fn on_sync<F>(mut self, callback: F) -> Self
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.on_sync = Some(Box::new(callback));
        self
    }

    pub fn on_destroy_when_empty<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_destroy_when_empty = Some(LifecycleEntry {
            resolvers: Vec::new(),
            invoke: Box::new(handler),
        });
        self
    }

    pub fn on_finalize<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut S, &mut HandlerContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on_finalize = Some(LifecycleEntry {
            resolvers: Vec::new(),
            invoke: Box::new(handler),
        });
        self
    }

    /// Runs after the state is gone, outside the mutation region.
    pub fn after_finalize<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.after_finalize = Some(Box::new(callback));
        self
    }

    pub fn action<F>(self, type_name: &str, handler: F) -> Self
    where
        F: Fn(&mut S, Value, &mut HandlerContext<'_>) -> Result<Option<Value>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.action_with(type_name, Vec::new(), handler)
    }

    pub fn action_with<F>(
        mut self,
        type_name: &str,
        resolvers: Vec<Arc<dyn Resolver>>,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut S, Value, &mut HandlerContext<'_>) -> Result<Option<Value>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.actions.push(ActionEntry {
            type_name: type_name.to_string(),
            last_name: last_component(type_name).to_string(),
            schema_id: schema_action_id(type_name),
            resolvers,
            invoke: Box::new(handler),
        });
        self
    }

    /// Register a client event handler. Multiple handlers for one name run
    /// in registration order within a single mutation region.
    pub fn on_event<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&mut S, &Value, &mut HandlerContext<'_>) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.events
            .entry(name.to_string())
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Declare an event's field order so its payload can travel as a
    /// field-ordered array in the opcode framing.
    pub fn event_schema<I, T>(mut self, name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.event_fields.insert(
            name.to_string(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Handler lookup, in weakening order: exact type name, last name
    /// component, schema action id, case-insensitive fallback.
    pub(crate) fn find_action(&self, identifier: &str) -> Option<&ActionEntry<S>> {
        self.actions
            .iter()
            .find(|e| e.type_name == identifier)
            .or_else(|| self.actions.iter().find(|e| e.last_name == identifier))
            .or_else(|| self.actions.iter().find(|e| e.schema_id == identifier))
            .or_else(|| {
                self.actions.iter().find(|e| {
                    e.type_name.eq_ignore_ascii_case(identifier)
                        || e.last_name.eq_ignore_ascii_case(identifier)
                        || e.schema_id.eq_ignore_ascii_case(identifier)
                })
            })
    }

    pub(crate) fn is_event_registered(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// The wire-facing event schema table, built-ins included.
    pub fn event_schema_table(&self) -> EventSchemaTable {
        let mut table = EventSchemaTable::new();
        for (name, fields) in &self.event_fields {
            table.register(name, fields.iter().cloned());
        }
        table
    }
}
