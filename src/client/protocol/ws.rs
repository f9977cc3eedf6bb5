//! WebSocket client transport.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};

use crate::api::schema::{Schema, SchemaType};
use crate::client::error::ClientError;
use crate::client::protocol::{ClientProtocol, ClientProtocolHandle, ClientShared, Outbound};

pub struct WebSocketClientProtocol {
    pub addr: String,
    pub port: u16,
}

impl WebSocketClientProtocol {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl ClientProtocol for WebSocketClientProtocol {
    async fn run<S: Schema>(
        self,
        shared: Arc<ClientShared>,
    ) -> Result<ClientProtocolHandle, ClientError> {
        let request = format!("ws://{}:{}", self.addr, self.port)
            .into_client_request()
            .map_err(|_| ClientError::ConnectionFailure)?;
        let (stream, _) = connect_async(request)
            .await
            .map_err(|_| ClientError::ConnectionFailure)?;
        let (mut ws_writer, mut ws_reader) = stream.split();

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Outbound>();

        tokio::spawn(async move {
            let mut vacuum_interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = vacuum_interval.tick() => {
                        shared.replies.vacuum();
                    }
                    outbound = outbound_rx.recv() => {
                        match outbound {
                            Some(Outbound::Frame(frame)) => {
                                let bytes = match shared.encode_outbound::<S>(&frame) {
                                    Ok(bytes) => bytes,
                                    Err(err) => {
                                        log::error!("outbound frame encode failed: {err}");
                                        continue;
                                    }
                                };
                                let message = match S::schema_type() {
                                    SchemaType::Text => match Utf8Bytes::try_from(bytes) {
                                        Ok(text) => Message::Text(text),
                                        Err(_) => continue,
                                    },
                                    SchemaType::Binary => Message::Binary(bytes.into()),
                                };
                                if ws_writer.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Some(Outbound::Stop) | None => break,
                        }
                    }
                    inbound = ws_reader.next() => {
                        let Some(Ok(message)) = inbound else { break };
                        let buffer: Vec<u8> = match message {
                            Message::Binary(bytes) => bytes.into(),
                            Message::Text(text) => Bytes::from(text).into(),
                            Message::Close(_) => break,
                            _ => continue,
                        };
                        match shared.decode_inbound::<S>(&buffer) {
                            Ok(frame) => shared.route_inbound(frame),
                            Err(err) => {
                                log::error!("inbound frame ignored: {err}");
                            }
                        }
                    }
                }
            }
            shared.connection_lost();
        });

        Ok(ClientProtocolHandle {
            outbound: outbound_tx,
        })
    }
}
