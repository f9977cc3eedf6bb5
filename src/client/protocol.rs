//! Client protocol plumbing: shared wire state, inbound routing, and the
//! transport seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;

use crate::api::codec::{EventSchemaTable, FrameCodec};
use crate::api::compress::{PathTable, SlotTable};
use crate::api::error::{CodecError, ErrorCode};
use crate::api::message::{
    EventDirection, Frame, StateUpdateKind, WireEncoding,
};
use crate::api::schema::Schema;
use crate::client::error::ClientError;
use crate::client::reply::ReplyManager;
use crate::client::state::ActiveLands;
use crate::client::subscription::EventSubscriptions;
use crate::state::diff::Patch;

#[cfg(feature = "ws")]
pub mod ws;

/// Wire tables a client declares for a land type it can join: the path
/// patterns for patch decompression and the event field orders.
#[derive(Debug, Clone, Default)]
pub struct ClientLandSchema {
    pub patterns: Vec<String>,
    pub event_fields: HashMap<String, Vec<String>>,
}

/// Everything that happens to the client, observable as a stream.
#[derive(Debug, Clone)]
pub enum ClientNotice {
    Joined {
        land_id: String,
        player_slot: Option<String>,
    },
    Update {
        kind: StateUpdateKind,
        patches: Vec<Patch>,
    },
    Event {
        name: String,
        payload: Value,
    },
    ServerError {
        code: ErrorCode,
        message: String,
    },
    Disconnected,
}

struct WireState {
    encoding: WireEncoding,
    slots: SlotTable,
    paths: PathTable,
    events: EventSchemaTable,
}

/// State shared between the facade and the protocol loop.
pub struct ClientShared {
    pub lands: ActiveLands,
    pub subscriptions: EventSubscriptions,
    pub replies: ReplyManager<Value, ClientError>,
    schemas: HashMap<String, ClientLandSchema>,
    wire: Mutex<WireState>,
    /// Replication frames that raced ahead of their join response; drained
    /// in arrival order once the view exists.
    pending_updates: Mutex<Vec<crate::api::message::StateUpdate>>,
    notice_tx: async_channel::Sender<ClientNotice>,
    notice_rx: async_channel::Receiver<ClientNotice>,
}

impl ClientShared {
    pub fn new(schemas: HashMap<String, ClientLandSchema>) -> Self {
        let (notice_tx, notice_rx) = async_channel::unbounded();
        Self {
            lands: ActiveLands::new(),
            subscriptions: EventSubscriptions::new(),
            replies: ReplyManager::new(),
            schemas,
            wire: Mutex::new(WireState {
                encoding: WireEncoding::JsonObject,
                slots: SlotTable::new(),
                paths: PathTable::new(),
                events: EventSchemaTable::new(),
            }),
            pending_updates: Mutex::new(Vec::new()),
            notice_tx,
            notice_rx,
        }
    }

    pub fn notices(&self) -> async_channel::Receiver<ClientNotice> {
        self.notice_rx.clone()
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notice_tx.try_send(notice);
    }

    pub fn encode_outbound<S: Schema>(&self, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        let Ok(mut wire) = self.wire.lock() else {
            return Err(CodecError::Malformed("wire state".to_string()));
        };
        let codec = FrameCodec::new(wire.encoding);
        let WireState { paths, events, .. } = &mut *wire;
        // Outbound client frames never compress patches; the tables ride
        // along for symmetry only.
        let value = codec.encode(frame, Some(paths), None, Some(events));
        S::to_bytes(&value)
    }

    pub fn decode_inbound<S: Schema>(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let value = S::from_bytes(bytes)?;
        let Ok(mut wire) = self.wire.lock() else {
            return Err(CodecError::Malformed("wire state".to_string()));
        };
        let codec = FrameCodec::new(wire.encoding);
        let WireState {
            paths,
            slots,
            events,
            ..
        } = &mut *wire;
        codec.decode(&value, paths, slots, Some(events))
    }

    fn adopt_schema(&self, land_type: &str) {
        let Some(schema) = self.schemas.get(land_type) else {
            return;
        };
        let Ok(mut wire) = self.wire.lock() else {
            return;
        };
        for pattern in &schema.patterns {
            wire.paths.register(pattern);
        }
        for (name, fields) in &schema.event_fields {
            wire.events.register(name, fields.iter().cloned());
        }
    }

    /// Route one decoded inbound frame.
    pub fn route_inbound(&self, frame: Frame) {
        match frame {
            Frame::JoinResponse {
                request_id,
                success,
                land_type,
                land_id,
                player_slot,
                encoding,
                reason,
                ..
            } => {
                if !success {
                    let reason = reason.unwrap_or_else(|| "denied".to_string());
                    self.replies
                        .error(&request_id, ClientError::JoinFailure(reason));
                    return;
                }
                if let Some(negotiated) = encoding
                    && let Ok(mut wire) = self.wire.lock()
                {
                    wire.encoding = negotiated;
                }
                let land_type = land_type.unwrap_or_default();
                self.adopt_schema(&land_type);
                if let Some(canonical) = &land_id {
                    self.lands.adopt(&land_type, canonical);
                }
                let summary = json!({
                    "landId": &land_id,
                    "landType": &land_type,
                    "playerSlot": &player_slot,
                });
                self.replies.ok(&request_id, summary);
                self.notify(ClientNotice::Joined {
                    land_id: land_id.unwrap_or_default(),
                    player_slot,
                });
                // Replication frames can race ahead of the join response on
                // the wire; whatever arrived early applies now, in order.
                let raced = match self.pending_updates.lock() {
                    Ok(mut pending) => std::mem::take(&mut *pending),
                    Err(_) => Vec::new(),
                };
                for update in raced {
                    self.handle_update(update, Vec::new());
                }
            }
            Frame::ActionResponse {
                request_id,
                payload,
            } => {
                self.replies.ok(&request_id, payload.unwrap_or(Value::Null));
            }
            Frame::Error {
                request_id,
                code,
                message,
            } => {
                let matched = request_id.as_deref().is_some_and(|id| {
                    self.replies.error(
                        id,
                        ClientError::Server {
                            code,
                            message: message.clone(),
                        },
                    )
                });
                if !matched {
                    // No pending request claims this error: last resort is
                    // fanning it out to every observer.
                    log::error!("unmatched server error {code:?}: {message}");
                    self.notify(ClientNotice::ServerError { code, message });
                }
            }
            Frame::StateUpdate(update) => self.handle_update(update, Vec::new()),
            Frame::StateUpdateWithEvents { update, events } => {
                self.handle_update(update, events);
            }
            Frame::Event(event) if event.direction == EventDirection::FromServer => {
                self.subscriptions.dispatch(&event.name, &event.payload);
                self.notify(ClientNotice::Event {
                    name: event.name,
                    payload: event.payload,
                });
            }
            other => {
                log::debug!("client dropped unroutable frame: {other:?}");
            }
        }
    }

    fn handle_update(
        &self,
        update: crate::api::message::StateUpdate,
        events: Vec<crate::api::message::EventMessage>,
    ) {
        let kind = update.kind;
        match self.lands.route_update(&update) {
            Ok(patches) => self.notify(ClientNotice::Update { kind, patches }),
            Err(ClientError::NotJoined) => {
                if let Ok(mut pending) = self.pending_updates.lock() {
                    pending.push(update);
                }
            }
            Err(err) => log::error!("state update dropped: {err}"),
        }
        for event in events {
            self.subscriptions.dispatch(&event.name, &event.payload);
            self.notify(ClientNotice::Event {
                name: event.name,
                payload: event.payload,
            });
        }
    }

    /// Connection is gone: reject all pending requests and tell observers.
    pub fn connection_lost(&self) {
        self.replies.drain_all(ClientError::ConnectionFailure);
        self.notify(ClientNotice::Disconnected);
    }
}

/// Outbound instruction for the protocol loop.
pub enum Outbound {
    Frame(Frame),
    Stop,
}

/// Handle to a running protocol loop.
pub struct ClientProtocolHandle {
    pub(crate) outbound: UnboundedSender<Outbound>,
}

impl ClientProtocolHandle {
    pub fn send(&self, frame: Frame) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::ConnectionFailure)
    }

    pub fn stop(&self) {
        let _ = self.outbound.send(Outbound::Stop);
    }
}

/// A client transport.
pub trait ClientProtocol {
    fn run<S: Schema>(
        self,
        shared: Arc<ClientShared>,
    ) -> impl Future<Output = Result<ClientProtocolHandle, ClientError>> + Send;
}
