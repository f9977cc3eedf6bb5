//! WebSocket server transport.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};

use crate::api::schema::{Schema, SchemaType};
use crate::server::error::ServerError;
use crate::server::protocol::{NetworkProtocol, SessionManager, decode_error_frame};
use crate::server::registry::Router;

pub struct WebSocketProtocol {
    pub addr: String,
}

impl WebSocketProtocol {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl NetworkProtocol for WebSocketProtocol {
    async fn run<S: Schema>(
        self,
        sessions: Arc<SessionManager<S>>,
        router: Arc<Router<S>>,
    ) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| ServerError::StartFailure(e.to_string()))?;
        log::info!("listening on {}", self.addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {peer}");
                    let sessions = Arc::clone(&sessions);
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        handle_connection::<S>(stream, sessions, router).await;
                    });
                }
                Err(err) => {
                    log::error!("accept failed: {err}");
                }
            }
        }
    }
}

async fn handle_connection<S: Schema>(
    stream: tokio::net::TcpStream,
    sessions: Arc<SessionManager<S>>,
    router: Arc<Router<S>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            log::error!("websocket handshake failed: {err}");
            return;
        }
    };
    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let (conn, mut outbound) = sessions.connect();

    // Writer side: drain the connection's byte queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
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
    });

    while let Some(message) = ws_reader.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        let buffer: Vec<u8> = match message {
            Message::Binary(bytes) => bytes.into(),
            Message::Text(text) => Bytes::from(text).into(),
            Message::Close(_) => break,
            _ => continue,
        };
        match conn.decode_frame::<S>(&buffer) {
            Ok(frame) => router.handle_frame(&conn, frame).await,
            Err(err) => {
                // Transport-level decode errors are logged and the frame
                // dropped; the peer gets a decode-error notice.
                log::error!("{}: undecodable frame: {err}", conn.client_id);
                conn.send_frame::<S>(&decode_error_frame(&err));
            }
        }
    }

    router.handle_disconnect(&conn.client_id);
    writer.abort();
}
