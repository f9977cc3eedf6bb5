//! Land registry and session router.
//!
//! The registry owns `land id → executor handle` and creates executors on
//! demand through per-type factories. The router sits between decoded frames
//! and executors: joins locate or create the land, subsequent frames carry
//! no land id and are routed through the connection's views.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::api::error::WireError;
use crate::api::ident::{ClientId, DeviceId, LandId, PlayerId};
use crate::api::message::{EventDirection, EventMessage, Frame, WireEncoding};
use crate::api::schema::Schema;
use crate::record::recorder::InputIds;
use crate::server::definition::LandDefinition;
use crate::server::error::ServerError;
use crate::server::executor::{self, JoinAccepted, LandHandle, SyncSink};
use crate::server::protocol::{Connection, LandView, ServerSink, SessionManager, error_frame};
use crate::server::session::JoinRequest;
use crate::state::LandState;

/// Creates executors for one registered land type.
pub trait LandFactory: Send + Sync {
    fn land_type(&self) -> &'static str;

    fn spawn(&self, land_id: LandId, sink: Arc<dyn SyncSink>) -> LandHandle;

    /// Path patterns the land's state declares, for patch compression.
    fn path_patterns(&self) -> &[String];

    fn event_schema_table(&self) -> crate::api::codec::EventSchemaTable;
}

impl std::fmt::Debug for dyn LandFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandFactory")
            .field("land_type", &self.land_type())
            .finish()
    }
}

/// The typed factory behind a [`LandDefinition`].
pub struct TypedLandFactory<S: LandState> {
    definition: Arc<LandDefinition<S>>,
    initial: Box<dyn Fn() -> S + Send + Sync>,
    patterns: Vec<String>,
}

impl<S: LandState> TypedLandFactory<S> {
    pub fn new<F>(definition: LandDefinition<S>, initial: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        // Probe a fresh state once for its declared wire paths.
        let patterns = initial().registered_paths();
        Self {
            definition: Arc::new(definition),
            initial: Box::new(initial),
            patterns,
        }
    }

    pub fn definition(&self) -> &Arc<LandDefinition<S>> {
        &self.definition
    }
}

impl<S: LandState> LandFactory for TypedLandFactory<S> {
    fn land_type(&self) -> &'static str {
        self.definition.land_type()
    }

    fn spawn(&self, land_id: LandId, sink: Arc<dyn SyncSink>) -> LandHandle {
        executor::spawn(
            land_id,
            Arc::clone(&self.definition),
            (self.initial)(),
            sink,
        )
    }

    fn path_patterns(&self) -> &[String] {
        &self.patterns
    }

    fn event_schema_table(&self) -> crate::api::codec::EventSchemaTable {
        self.definition.event_schema_table()
    }
}

/// Owns the executors.
#[derive(Default)]
pub struct LandRegistry {
    factories: HashMap<&'static str, Arc<dyn LandFactory>>,
    lands: Arc<RwLock<HashMap<String, LandHandle>>>,
}

impl LandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn LandFactory>) {
        self.factories.insert(factory.land_type(), factory);
    }

    /// Shared handle map; executors remove themselves through the sink when
    /// they exit.
    pub fn lands(&self) -> Arc<RwLock<HashMap<String, LandHandle>>> {
        Arc::clone(&self.lands)
    }

    pub fn get(&self, canonical: &str) -> Option<LandHandle> {
        self.lands
            .read()
            .ok()?
            .get(canonical)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    pub fn factory(&self, land_type: &str) -> Option<Arc<dyn LandFactory>> {
        self.factories.get(land_type).cloned()
    }

    /// Locate the executor for `type:instance`, creating it if needed. With
    /// no instance given, a fresh land with a random instance id is created.
    pub fn find_or_create(
        &self,
        land_type: &str,
        instance: Option<&str>,
        sink: Arc<dyn SyncSink>,
    ) -> Result<(LandHandle, Arc<dyn LandFactory>), ServerError> {
        let factory = self
            .factories
            .get(land_type)
            .cloned()
            .ok_or_else(|| ServerError::LandTypeNotFound(land_type.to_string()))?;

        let land_id = match instance {
            Some(instance) => LandId::new(land_type, instance),
            None => LandId::generate(land_type),
        };
        let canonical = land_id.canonical();

        if let Ok(lands) = self.lands.read()
            && let Some(handle) = lands.get(&canonical)
            && !handle.is_closed()
        {
            return Ok((handle.clone(), factory));
        }

        let mut lands = self
            .lands
            .write()
            .map_err(|_| ServerError::StartFailure("registry poisoned".to_string()))?;
        // Raced creation: someone else spawned it between the locks.
        if let Some(handle) = lands.get(&canonical)
            && !handle.is_closed()
        {
            return Ok((handle.clone(), factory));
        }
        let handle = factory.spawn(land_id, sink);
        lands.insert(canonical, handle.clone());
        Ok((handle, factory))
    }
}

/// Routes decoded frames to executors and replies to the connection.
pub struct Router<S: Schema> {
    registry: LandRegistry,
    sessions: Arc<SessionManager<S>>,
    sink: Arc<dyn SyncSink>,
}

impl<S: Schema> Router<S> {
    pub fn new(registry: LandRegistry, sessions: Arc<SessionManager<S>>) -> Self {
        let sink = Arc::new(ServerSink {
            sessions: Arc::clone(&sessions),
            lands: registry.lands(),
        });
        Self {
            registry,
            sessions,
            sink,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager<S>> {
        &self.sessions
    }

    pub fn registry(&self) -> &LandRegistry {
        &self.registry
    }

    pub async fn handle_frame(&self, conn: &Arc<Connection>, frame: Frame) {
        match frame {
            Frame::Join {
                request_id,
                land_type,
                land_instance_id,
                options,
                encoding,
            } => {
                self.handle_join(
                    conn,
                    request_id,
                    &land_type,
                    land_instance_id.as_deref(),
                    options,
                    encoding,
                )
                .await;
            }
            Frame::Action {
                request_id,
                envelope,
            } => {
                let result = self.dispatch_action(conn, &envelope).await;
                match result {
                    Ok(payload) => conn.send_frame::<S>(&Frame::ActionResponse {
                        request_id,
                        payload,
                    }),
                    Err(err) => conn.send_frame::<S>(&error_frame(Some(request_id), &err)),
                }
            }
            Frame::Event(event) if event.direction == EventDirection::FromClient => {
                if let Err(err) = self.dispatch_client_event(conn, &event).await {
                    conn.send_frame::<S>(&error_frame(None, &err));
                }
            }
            other => {
                log::debug!(
                    "{}: dropped server-bound frame it cannot route: {other:?}",
                    conn.client_id
                );
            }
        }
    }

    async fn handle_join(
        &self,
        conn: &Arc<Connection>,
        request_id: String,
        land_type: &str,
        instance: Option<&str>,
        options: Option<Value>,
        encoding: Option<WireEncoding>,
    ) {
        let located =
            self.registry
                .find_or_create(land_type, instance, Arc::clone(&self.sink));
        let (handle, factory) = match located {
            Ok(found) => found,
            Err(err) => {
                conn.send_frame::<S>(&deny_response(request_id, err.to_string()));
                return;
            }
        };

        let request = join_request_from(&request_id, conn, options);
        match handle.join(request).await {
            Ok(JoinAccepted {
                player_id,
                land_id,
                ..
            }) => {
                conn.adopt_land_schema(factory.path_patterns(), factory.event_schema_table());
                conn.add_view(
                    land_id.clone(),
                    LandView {
                        land_type: land_type.to_string(),
                        player_id: player_id.clone(),
                    },
                );
                let negotiated = encoding.unwrap_or(WireEncoding::JsonObject);
                conn.send_frame::<S>(&Frame::JoinResponse {
                    request_id,
                    success: true,
                    land_type: Some(handle.land_type().to_string()),
                    land_instance_id: Some(handle.land_id().instance().to_string()),
                    land_id: Some(land_id),
                    player_slot: Some(player_id.to_string()),
                    encoding: Some(negotiated),
                    reason: None,
                });
                // The response itself still travels in the old framing; the
                // negotiated one governs everything after it.
                conn.set_encoding(negotiated);
            }
            Err(err) => {
                conn.send_frame::<S>(&deny_response(request_id, err.to_string()));
            }
        }
    }

    async fn dispatch_action(
        &self,
        conn: &Arc<Connection>,
        envelope: &crate::api::message::ActionEnvelope,
    ) -> Result<Option<Value>, WireError> {
        let (canonical, view) = conn
            .active_view()
            .ok_or_else(|| WireError::InternalError("not joined to any land".to_string()))?;
        let handle = self
            .registry
            .get(&canonical)
            .ok_or_else(|| WireError::InternalError("land is gone".to_string()))?;
        let payload = envelope
            .payload
            .decode()
            .map_err(|err| WireError::DecodeError(err.to_string()))?;
        handle
            .action(
                InputIds {
                    player_id: Some(view.player_id),
                    client_id: Some(conn.client_id.clone()),
                    session_id: Some(conn.session_id.clone()),
                },
                envelope.type_identifier.clone(),
                payload,
            )
            .await
    }

    async fn dispatch_client_event(
        &self,
        conn: &Arc<Connection>,
        event: &EventMessage,
    ) -> Result<(), WireError> {
        let (canonical, view) = conn
            .active_view()
            .ok_or_else(|| WireError::InternalError("not joined to any land".to_string()))?;
        let handle = self
            .registry
            .get(&canonical)
            .ok_or_else(|| WireError::InternalError("land is gone".to_string()))?;
        handle
            .client_event(
                InputIds {
                    player_id: Some(view.player_id),
                    client_id: Some(conn.client_id.clone()),
                    session_id: Some(conn.session_id.clone()),
                },
                event.name.clone(),
                event.payload.clone(),
            )
            .await
    }

    /// Transport lost the connection: leave every joined land and drop all
    /// per-connection wire state.
    pub fn handle_disconnect(&self, client: &ClientId) {
        for (canonical, view) in self.sessions.disconnect(client) {
            if let Some(handle) = self.registry.get(&canonical) {
                handle.leave(view.player_id, client.clone());
            }
        }
    }
}

fn deny_response(request_id: String, reason: String) -> Frame {
    Frame::JoinResponse {
        request_id,
        success: false,
        land_type: None,
        land_instance_id: None,
        land_id: None,
        player_slot: None,
        encoding: None,
        reason: Some(reason),
    }
}

fn join_request_from(
    request_id: &str,
    conn: &Arc<Connection>,
    options: Option<Value>,
) -> JoinRequest {
    let player_id = options
        .as_ref()
        .and_then(|o| o.get("playerId"))
        .and_then(Value::as_str)
        .map(PlayerId::new);
    let device_id = options
        .as_ref()
        .and_then(|o| o.get("deviceId"))
        .and_then(Value::as_str)
        .map(DeviceId::new);
    let is_guest = options
        .as_ref()
        .and_then(|o| o.get("isGuest"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    JoinRequest {
        request_id: request_id.to_string(),
        player_id,
        client_id: conn.client_id.clone(),
        session_id: conn.session_id.clone(),
        device_id,
        is_guest,
        options,
        metadata: HashMap::new(),
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::api::schema::json::Json;
    use crate::server::executor::NullSink;
    use crate::state::{FieldVisitor, LandState, SyncMode, Synced};
    use serde_json::json;

    struct Counter {
        value: Synced<i64>,
    }

    impl LandState for Counter {
        fn visit(&self, visitor: &mut dyn FieldVisitor) {
            visitor.field(
                "value",
                SyncMode::Broadcast,
                self.value.is_dirty(),
                crate::state::FieldValue::Plain(self.value.emit()),
            );
        }

        fn clear_dirty(&mut self) {
            self.value.clear_dirty();
        }

        fn registered_paths(&self) -> Vec<String> {
            vec!["value".into()]
        }
    }

    fn counter_factory() -> Arc<dyn LandFactory> {
        let definition = LandDefinition::<Counter>::new("counter")
            .tick_interval(std::time::Duration::from_millis(20))
            .action("BumpAction", |state, _, _| {
                state.value.update(|v| *v += 1);
                Ok(Some(json!(*state.value.get())))
            });
        Arc::new(TypedLandFactory::new(definition, || Counter {
            value: Synced::new(0),
        }))
    }

    #[tokio::test]
    async fn find_or_create_reuses_live_instances() {
        let mut registry = LandRegistry::new();
        registry.register(counter_factory());
        let sink: Arc<dyn SyncSink> = Arc::new(NullSink);

        let (a, _) = registry
            .find_or_create("counter", Some("one"), Arc::clone(&sink))
            .unwrap();
        let (b, _) = registry
            .find_or_create("counter", Some("one"), Arc::clone(&sink))
            .unwrap();
        assert_eq!(a.land_id(), b.land_id());

        // Instanceless joins always mint a new land.
        let (c, _) = registry
            .find_or_create("counter", None, Arc::clone(&sink))
            .unwrap();
        assert_ne!(c.land_id().canonical(), a.land_id().canonical());

        let err = registry.find_or_create("nope", None, sink).unwrap_err();
        assert!(matches!(err, ServerError::LandTypeNotFound(_)));
    }

    #[tokio::test]
    async fn join_then_action_round_trip_through_router() {
        let mut registry = LandRegistry::new();
        registry.register(counter_factory());
        let sessions: Arc<SessionManager<Json>> = Arc::new(SessionManager::new());
        let router = Router::new(registry, Arc::clone(&sessions));

        let (conn, mut rx) = sessions.connect();
        router
            .handle_frame(
                &conn,
                Frame::Join {
                    request_id: "r1".into(),
                    land_type: "counter".into(),
                    land_instance_id: Some("main".into()),
                    options: Some(json!({"playerId": "p1"})),
                    encoding: Some(WireEncoding::OpcodeArray),
                },
            )
            .await;

        let bytes = rx.recv().await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], json!("joinResponse"));
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["landId"], json!("counter:main"));
        assert_eq!(value["playerSlot"], json!("p1"));

        router
            .handle_frame(
                &conn,
                Frame::Action {
                    request_id: "r2".into(),
                    envelope: crate::api::message::ActionEnvelope::new(
                        "BumpAction",
                        &json!({}),
                    ),
                },
            )
            .await;

        // Responses after the join ride the negotiated opcode framing.
        let bytes = rx.recv().await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value[0], json!(102));
        assert_eq!(value[1], json!("r2"));
        assert_eq!(value[2], json!(1));

        router.handle_disconnect(&conn.client_id);
        assert!(sessions.get(&conn.client_id).is_none());
    }

    #[tokio::test]
    async fn join_to_unknown_type_is_denied_not_dropped() {
        let registry = LandRegistry::new();
        let sessions: Arc<SessionManager<Json>> = Arc::new(SessionManager::new());
        let router = Router::new(registry, Arc::clone(&sessions));

        let (conn, mut rx) = sessions.connect();
        router
            .handle_frame(
                &conn,
                Frame::Join {
                    request_id: "r1".into(),
                    land_type: "ghost".into(),
                    land_instance_id: None,
                    options: None,
                    encoding: None,
                },
            )
            .await;

        let bytes = rx.recv().await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["success"], json!(false));
        assert!(value["reason"].as_str().unwrap().contains("ghost"));
    }
}
