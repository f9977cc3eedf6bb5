//! Contexts threaded into handler bodies.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::ident::{ClientId, LandId, PlayerId, SessionId};
use crate::api::message::EventTarget;
use crate::record::ResolverOutput;

/// Identity of the land a handler runs inside.
#[derive(Debug, Clone)]
pub struct LandContext {
    pub land_id: LandId,
    pub land_type: &'static str,
}

/// A server event emitted from a handler body, before fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub name: String,
    pub payload: Value,
    pub target: EventTarget,
}

/// What a handler body sees. Mutation of the state record happens through
/// the `&mut S` the executor passes alongside; the context carries identity,
/// the tick binding, resolver outputs and the event emission buffer.
pub struct HandlerContext<'a> {
    pub land: &'a LandContext,
    /// The last committed tick at the time the handler runs.
    pub tick_id: i64,
    pub player_id: Option<PlayerId>,
    pub client_id: Option<ClientId>,
    pub session_id: Option<SessionId>,
    outputs: &'a BTreeMap<String, ResolverOutput>,
    emitted: Vec<EmittedEvent>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        land: &'a LandContext,
        tick_id: i64,
        outputs: &'a BTreeMap<String, ResolverOutput>,
    ) -> Self {
        Self {
            land,
            tick_id,
            player_id: None,
            client_id: None,
            session_id: None,
            outputs,
            emitted: Vec::new(),
        }
    }

    pub fn with_player(mut self, player_id: PlayerId) -> Self {
        self.player_id = Some(player_id);
        self
    }

    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Raw output of a named resolver.
    pub fn resolver(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name).map(|o| &o.value)
    }

    /// Typed view of a resolver output.
    pub fn resolver_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.outputs
            .get(name)
            .and_then(|o| serde_json::from_value(o.value.clone()).ok())
    }

    /// Emit a server event. It fans out when the handler commits, stamped
    /// with this context's tick.
    pub fn emit(&mut self, name: impl Into<String>, payload: Value, target: EventTarget) {
        self.emitted.push(EmittedEvent {
            name: name.into(),
            payload,
            target,
        });
    }

    pub fn take_emitted(&mut self) -> Vec<EmittedEvent> {
        std::mem::take(&mut self.emitted)
    }
}
