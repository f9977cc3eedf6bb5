//! Session management and the transport seam.
//!
//! A [`SessionManager`] owns one [`Connection`] per live transport client:
//! the outbound byte queue, the negotiated framing, the per-connection slot
//! dictionary and path/event tables, and the set of land views the client
//! has joined. Transports implement [`NetworkProtocol`] and hand decoded
//! bytes to the router; everything frame-shaped stays here.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::api::codec::{EventSchemaTable, FrameCodec};
use crate::api::compress::{PathTable, SlotTable};
use crate::api::error::{CodecError, ErrorCode, WireError};
use crate::api::ident::{ClientId, LandId, PlayerId, SessionId};
use crate::api::message::{EventMessage, Frame, StateUpdate, WireEncoding};
use crate::api::schema::Schema;
use crate::server::error::ServerError;
use crate::server::executor::{LandHandle, SyncSink};
use crate::server::registry::Router;

#[cfg(feature = "ws")]
pub mod ws;

/// One land a connection has joined.
#[derive(Debug, Clone)]
pub struct LandView {
    pub land_type: String,
    pub player_id: PlayerId,
}

struct ConnState {
    encoding: WireEncoding,
    slots: SlotTable,
    paths: PathTable,
    events: EventSchemaTable,
    views: HashMap<String, LandView>,
    active: Option<String>,
}

/// A live transport client.
pub struct Connection {
    pub client_id: ClientId,
    pub session_id: SessionId,
    tx: UnboundedSender<Vec<u8>>,
    state: Mutex<ConnState>,
}

impl Connection {
    pub fn encoding(&self) -> WireEncoding {
        self.state
            .lock()
            .map(|s| s.encoding)
            .unwrap_or(WireEncoding::JsonObject)
    }

    pub fn set_encoding(&self, encoding: WireEncoding) {
        if let Ok(mut state) = self.state.lock() {
            state.encoding = encoding;
        }
    }

    /// Install the joined land's wire tables.
    pub fn adopt_land_schema(&self, patterns: &[String], events: EventSchemaTable) {
        if let Ok(mut state) = self.state.lock() {
            for pattern in patterns {
                state.paths.register(pattern);
            }
            state.events = events;
        }
    }

    pub fn add_view(&self, canonical: String, view: LandView) {
        if let Ok(mut state) = self.state.lock() {
            state.views.insert(canonical.clone(), view);
            state.active = Some(canonical);
        }
    }

    pub fn remove_view(&self, canonical: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.views.remove(canonical);
            if state.active.as_deref() == Some(canonical) {
                state.active = state.views.keys().next().cloned();
            }
        }
    }

    /// The land an incoming frame without a land id belongs to: the most
    /// recently joined view.
    pub fn active_view(&self) -> Option<(String, LandView)> {
        let state = self.state.lock().ok()?;
        let canonical = state.active.clone()?;
        let view = state.views.get(&canonical)?.clone();
        Some((canonical, view))
    }

    pub fn views(&self) -> Vec<(String, LandView)> {
        self.state
            .lock()
            .map(|s| s.views.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Encode a frame under this connection's negotiated framing and queue
    /// the bytes.
    pub fn send_frame<S: Schema>(&self, frame: &Frame) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let codec = FrameCodec::new(state.encoding);
        let ConnState {
            paths,
            slots,
            events,
            ..
        } = &mut *state;
        let value = codec.encode(frame, Some(paths), Some(slots), Some(events));
        match S::to_bytes(&value) {
            Ok(bytes) => {
                let _ = self.tx.send(bytes);
            }
            Err(err) => {
                log::error!("{}: frame encode failed: {err}", self.client_id);
            }
        }
    }

    /// Decode one inbound channel payload. Client→server frames carry no
    /// compressed patches, but the shared tables keep decode symmetric.
    pub fn decode_frame<S: Schema>(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let value = S::from_bytes(bytes)?;
        let Ok(mut state) = self.state.lock() else {
            return Err(CodecError::Malformed("connection state".to_string()));
        };
        let codec = FrameCodec::new(state.encoding);
        let ConnState {
            paths,
            slots,
            events,
            ..
        } = &mut *state;
        codec.decode(&value, paths, slots, Some(events))
    }

}

/// Registry of live connections, generic over the channel schema.
pub struct SessionManager<S: Schema> {
    connections: RwLock<HashMap<ClientId, Arc<Connection>>>,
    _schema: PhantomData<S>,
}

impl<S: Schema> Default for SessionManager<S> {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            _schema: PhantomData,
        }
    }
}

impl<S: Schema> SessionManager<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh connection and hand back its outbound byte queue.
    pub fn connect(&self) -> (Arc<Connection>, UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            client_id: ClientId::random(),
            session_id: SessionId::random(),
            tx,
            state: Mutex::new(ConnState {
                encoding: WireEncoding::JsonObject,
                slots: SlotTable::new(),
                paths: PathTable::new(),
                events: EventSchemaTable::new(),
                views: HashMap::new(),
                active: None,
            }),
        });
        if let Ok(mut connections) = self.connections.write() {
            connections.insert(connection.client_id.clone(), Arc::clone(&connection));
        }
        (connection, rx)
    }

    /// Drop a connection; the slot dictionary dies with it. Returns the land
    /// views it held so the router can fan out leaves.
    pub fn disconnect(&self, client: &ClientId) -> Vec<(String, LandView)> {
        let connection = self
            .connections
            .write()
            .ok()
            .and_then(|mut conns| conns.remove(client));
        connection.map(|c| c.views()).unwrap_or_default()
    }

    pub fn get(&self, client: &ClientId) -> Option<Arc<Connection>> {
        self.connections.read().ok()?.get(client).cloned()
    }

    pub fn send_frame(&self, client: &ClientId, frame: &Frame) {
        if let Some(connection) = self.get(client) {
            connection.send_frame::<S>(frame);
        }
    }
}

/// The executor-facing sink: pushes per-client replication frames and
/// removes registry entries when a land closes.
pub struct ServerSink<S: Schema> {
    pub sessions: Arc<SessionManager<S>>,
    pub lands: Arc<RwLock<HashMap<String, LandHandle>>>,
}

impl<S: Schema> SyncSink for ServerSink<S> {
    fn push_update(&self, client: &ClientId, update: StateUpdate, events: Vec<EventMessage>) {
        use crate::api::message::StateUpdateKind;
        // Nothing moved and nothing to say: stay quiet.
        if update.kind == StateUpdateKind::NoChange && events.is_empty() {
            return;
        }
        let frame = if events.is_empty() {
            Frame::StateUpdate(update)
        } else {
            Frame::StateUpdateWithEvents { update, events }
        };
        self.sessions.send_frame(client, &frame);
    }

    fn land_closed(&self, land_id: &LandId) {
        if let Ok(mut lands) = self.lands.write() {
            lands.remove(&land_id.canonical());
        }
        log::debug!("{land_id}: executor exited, registry entry removed");
    }
}

/// A server transport. Implementations accept duplex byte channels, decode
/// frames through the connection, and drive the [`Router`].
pub trait NetworkProtocol {
    fn run<S: Schema>(
        self,
        sessions: Arc<SessionManager<S>>,
        router: Arc<Router<S>>,
    ) -> impl Future<Output = Result<(), ServerError>> + Send;
}

/// Convenience: map a wire error onto an error frame answering `request_id`.
pub fn error_frame(request_id: Option<String>, err: &WireError) -> Frame {
    Frame::Error {
        request_id,
        code: err.code(),
        message: err.to_string(),
    }
}

/// An error frame for decode failures, which carry no request id.
pub fn decode_error_frame(err: &CodecError) -> Frame {
    Frame::Error {
        request_id: None,
        code: ErrorCode::DecodeError,
        message: err.to_string(),
    }
}
