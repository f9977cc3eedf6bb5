//! Typed event subscriptions and the map-subscription helper.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::state::diff::{Patch, PatchOp};

type EventHandler = Box<dyn Fn(&Value) + Send + Sync>;

/// Server-event fan-in on the client: handlers keyed by event name, run in
/// subscription order.
#[derive(Default)]
pub struct EventSubscriptions {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers
                .entry(name.to_string())
                .or_default()
                .push(Box::new(handler));
        }
    }

    /// Typed subscription: payloads that fail to decode are logged and
    /// skipped, not delivered half-parsed.
    pub fn on_typed<T, F>(&self, name: &str, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event_name = name.to_string();
        self.on(name, move |payload| {
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(typed) => handler(typed),
                Err(err) => {
                    log::error!("event `{event_name}` payload did not decode: {err}");
                }
            }
        });
    }

    pub fn dispatch(&self, name: &str, payload: &Value) -> usize {
        let Ok(handlers) = self.handlers.read() else {
            return 0;
        };
        match handlers.get(name) {
            Some(list) => {
                for handler in list {
                    handler(payload);
                }
                list.len()
            }
            None => 0,
        }
    }
}

/// What happened to one key of an observed map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapChange {
    Added(String, Value),
    Changed(String, Value),
    Removed(String),
}

/// Watches a map-valued path (`/players`) in the patch stream and reports
/// per-key additions, changes and removals.
pub struct MapSubscription {
    prefix: String,
}

impl MapSubscription {
    /// `prefix` is the JSON Pointer of the map, e.g. `/players`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn observe(&self, patches: &[Patch]) -> Vec<MapChange> {
        let mut changes = Vec::new();
        for patch in patches {
            let Some(rest) = patch.path.strip_prefix(self.prefix.as_str()) else {
                continue;
            };
            let Some(rest) = rest.strip_prefix('/') else {
                continue;
            };
            let (key, deeper) = match rest.split_once('/') {
                Some((key, deeper)) => (key, Some(deeper)),
                None => (rest, None),
            };
            let key = key.replace("~1", "/").replace("~0", "~");
            match (patch.op, deeper) {
                // Whole-entry operations.
                (PatchOp::Add, None) => {
                    if let Some(value) = &patch.value {
                        changes.push(MapChange::Added(key, value.clone()));
                    }
                }
                (PatchOp::Remove, None) => changes.push(MapChange::Removed(key)),
                (PatchOp::Replace, None) => {
                    if let Some(value) = &patch.value {
                        changes.push(MapChange::Changed(key, value.clone()));
                    }
                }
                // Anything under an entry is a change of that entry.
                (_, Some(_)) => {
                    if let Some(value) = &patch.value {
                        changes.push(MapChange::Changed(key, value.clone()));
                    } else {
                        changes.push(MapChange::Changed(key, Value::Null));
                    }
                }
            }
        }
        changes
    }
}
