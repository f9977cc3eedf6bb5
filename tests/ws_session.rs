//! End-to-end session over a real WebSocket: join, action, replication,
//! server events, all through the negotiated opcode framing.

#![cfg(all(feature = "server", feature = "client", feature = "ws", feature = "json"))]

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use tempest::api::message::EventTarget;
use tempest::api::schema::json::Json;
use tempest::client::TempestClientBuilder;
use tempest::client::protocol::ClientLandSchema;
use tempest::client::protocol::ws::WebSocketClientProtocol;
use tempest::server::TempestServer;
use tempest::server::definition::LandDefinition;
use tempest::server::protocol::ws::WebSocketProtocol;
use tempest::server::session::{JoinDecision, JoinRequest};
use tempest::state::{FieldValue, FieldVisitor, LandState, SyncMode, Synced};

struct Tally {
    value: Synced<i64>,
}

impl LandState for Tally {
    fn visit(&self, visitor: &mut dyn FieldVisitor) {
        visitor.field(
            "value",
            SyncMode::Broadcast,
            self.value.is_dirty(),
            FieldValue::Plain(self.value.emit()),
        );
    }

    fn clear_dirty(&mut self) {
        self.value.clear_dirty();
    }

    fn registered_paths(&self) -> Vec<String> {
        vec!["value".into()]
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

#[tokio::test]
async fn join_act_and_mirror_over_websocket() {
    let port = free_port();

    let definition = LandDefinition::<Tally>::new("tally")
        .tick_interval(Duration::from_millis(20))
        .sync_interval(Duration::from_millis(20))
        .can_join(|_, req: &JoinRequest, _| {
            match req.player_id.clone() {
                Some(player) => JoinDecision::Allow(player),
                None => JoinDecision::Deny("anonymous".into()),
            }
        })
        .action("BumpAction", |state, payload, ctx| {
            let by = payload["by"].as_i64().unwrap_or(1);
            state.value.update(|v| *v += by);
            ctx.emit("Bumped", json!({"by": by}), EventTarget::All);
            Ok(Some(json!({"value": *state.value.get()})))
        });

    let server = TempestServer::new(
        WebSocketProtocol::new(format!("127.0.0.1:{port}")),
        Json,
    )
    .register(definition, || Tally {
        value: Synced::new(0),
    });
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = TempestClientBuilder::new(WebSocketClientProtocol::new("127.0.0.1", port))
        .with_land(
            "tally",
            ClientLandSchema {
                patterns: vec!["value".into()],
                event_fields: HashMap::new(),
            },
        )
        .build::<Json>()
        .await
        .expect("client connects");

    let joined = client
        .join("tally", Some("main"), Some(json!({"playerId": "p1"})))
        .await
        .expect("join succeeds");
    assert_eq!(joined.land_id, "tally:main");
    assert_eq!(joined.player_slot.as_deref(), Some("p1"));

    let response = client
        .action("BumpAction", &json!({"by": 5}))
        .await
        .expect("action answered");
    assert_eq!(response["value"], json!(5));

    // Wait for the sync loop to replicate; the mirror converges on the
    // authoritative value.
    let mut mirrored = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(state) = client.state()
            && state["value"] == json!(5)
        {
            mirrored = Some(state);
            break;
        }
    }
    let state = mirrored.expect("mirror caught up with the server");
    assert_eq!(state["value"], json!(5));

    // A second client joining the same land sees the same broadcast state.
    let watcher = TempestClientBuilder::new(WebSocketClientProtocol::new("127.0.0.1", port))
        .with_land(
            "tally",
            ClientLandSchema {
                patterns: vec!["value".into()],
                event_fields: HashMap::new(),
            },
        )
        .build::<Json>()
        .await
        .expect("watcher connects");
    watcher
        .join("tally", Some("main"), Some(json!({"playerId": "p2"})))
        .await
        .expect("watcher joins");
    let mut caught_up = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(state) = watcher.state()
            && state["value"] == json!(5)
        {
            caught_up = true;
            break;
        }
    }
    assert!(caught_up, "watcher received the first sync");

    client.close();
    watcher.close();
}

#[tokio::test]
async fn unknown_action_comes_back_as_an_error() {
    let port = free_port();
    let definition = LandDefinition::<Tally>::new("tally")
        .tick_interval(Duration::from_millis(20))
        .can_join(|_, req: &JoinRequest, _| {
            match req.player_id.clone() {
                Some(player) => JoinDecision::Allow(player),
                None => JoinDecision::Deny("anonymous".into()),
            }
        });
    let server = TempestServer::new(
        WebSocketProtocol::new(format!("127.0.0.1:{port}")),
        Json,
    )
    .register(definition, || Tally {
        value: Synced::new(0),
    });
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = TempestClientBuilder::new(WebSocketClientProtocol::new("127.0.0.1", port))
        .build::<Json>()
        .await
        .expect("client connects");
    client
        .join("tally", None, Some(json!({"playerId": "p1"})))
        .await
        .expect("join succeeds");

    let err = client
        .action("Ghost", &json!({}))
        .await
        .expect_err("unknown action is an error frame");
    assert!(matches!(
        err,
        tempest::client::error::ClientError::Server { .. }
    ));
}
