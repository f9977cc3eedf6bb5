// The client SDK: mirrored state, correlated requests, typed subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::api::message::{
    ActionEnvelope, EventDirection, EventMessage, Frame, WireEncoding,
};
use crate::api::schema::Schema;
use crate::client::error::ClientError;
use crate::client::protocol::{
    ClientLandSchema, ClientNotice, ClientProtocol, ClientProtocolHandle, ClientShared,
};
use crate::client::reply::Reply;

pub mod error;
pub mod protocol;
pub mod reply;
pub mod state;
pub mod subscription;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TempestClientBuilder<P>
where
    P: ClientProtocol,
{
    protocol: P,
    schemas: HashMap<String, ClientLandSchema>,
    encoding: WireEncoding,
}

impl<P> TempestClientBuilder<P>
where
    P: ClientProtocol,
{
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            schemas: HashMap::new(),
            encoding: WireEncoding::OpcodeArray,
        }
    }

    /// Declare the wire tables for a land type this client may join.
    pub fn with_land(mut self, land_type: &str, schema: ClientLandSchema) -> Self {
        self.schemas.insert(land_type.to_string(), schema);
        self
    }

    /// Framing to request at join time. Opcode arrays by default.
    pub fn request_encoding(mut self, encoding: WireEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub async fn build<S: Schema>(self) -> Result<TempestClient, ClientError> {
        let shared = Arc::new(ClientShared::new(self.schemas));
        let handle = self.protocol.run::<S>(Arc::clone(&shared)).await?;
        Ok(TempestClient {
            shared,
            handle,
            encoding: self.encoding,
        })
    }
}

/// A land this client joined.
#[derive(Debug, Clone)]
pub struct JoinedLand {
    pub land_id: String,
    pub land_type: String,
    pub player_slot: Option<String>,
}

pub struct TempestClient {
    shared: Arc<ClientShared>,
    handle: ClientProtocolHandle,
    encoding: WireEncoding,
}

impl TempestClient {
    /// Join a land. With no instance id the server mints a fresh land and
    /// the canonical id comes back in the response.
    pub async fn join(
        &self,
        land_type: &str,
        instance: Option<&str>,
        options: Option<Value>,
    ) -> Result<JoinedLand, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let rx = self.shared.replies.register(&request_id, REQUEST_TIMEOUT);
        self.handle.send(Frame::Join {
            request_id,
            land_type: land_type.to_string(),
            land_instance_id: instance.map(str::to_string),
            options,
            encoding: Some(self.encoding),
        })?;

        match rx.await {
            Ok(Reply::Ok(summary)) => Ok(JoinedLand {
                land_id: summary["landId"].as_str().unwrap_or_default().to_string(),
                land_type: summary["landType"]
                    .as_str()
                    .unwrap_or(land_type)
                    .to_string(),
                player_slot: summary["playerSlot"].as_str().map(str::to_string),
            }),
            Ok(Reply::Err(err)) => Err(err),
            Ok(Reply::Timeout) => Err(ClientError::Timeout),
            Err(_) => Err(ClientError::ConnectionFailure),
        }
    }

    /// Dispatch a typed action and await its response payload.
    pub async fn action(
        &self,
        type_identifier: &str,
        payload: &Value,
    ) -> Result<Value, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let rx = self.shared.replies.register(&request_id, REQUEST_TIMEOUT);
        self.handle.send(Frame::Action {
            request_id,
            envelope: ActionEnvelope::new(type_identifier, payload),
        })?;

        match rx.await {
            Ok(Reply::Ok(payload)) => Ok(payload),
            Ok(Reply::Err(err)) => Err(err),
            Ok(Reply::Timeout) => Err(ClientError::Timeout),
            Err(_) => Err(ClientError::ConnectionFailure),
        }
    }

    /// Fire-and-forget client event.
    pub fn send_event(&self, name: &str, payload: Value) -> Result<(), ClientError> {
        self.handle.send(Frame::Event(EventMessage {
            direction: EventDirection::FromClient,
            name: name.to_string(),
            payload,
        }))
    }

    /// Subscribe to a server event by name.
    pub fn on_event<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.subscriptions.on(name, handler);
    }

    /// Subscribe with a typed payload.
    pub fn on_event_typed<T, F>(&self, name: &str, handler: F)
    where
        T: serde::de::DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.shared.subscriptions.on_typed::<T, F>(name, handler);
    }

    /// Clone of the active land's mirrored state tree.
    pub fn state(&self) -> Option<Value> {
        self.shared.lands.active_state()
    }

    /// Stream of everything happening to this client.
    pub fn notices(&self) -> async_channel::Receiver<ClientNotice> {
        self.shared.notices()
    }

    pub fn close(&self) {
        self.handle.stop();
    }
}
