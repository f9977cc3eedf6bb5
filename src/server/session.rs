//! Player sessions held by a land executor.

use std::collections::HashMap;

use crate::api::ident::{ClientId, DeviceId, PlayerId, SessionId};

/// One player's live presence in a land. Created on the first successful
/// join, removed on leave. At most one live client per player per land; a
/// second join for the same player evicts the previous client.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub client_id: Option<ClientId>,
    pub session_id: Option<SessionId>,
    pub device_id: Option<DeviceId>,
    pub is_guest: bool,
    /// Opaque attributes for game code: auth claims, matchmaking tags.
    pub metadata: HashMap<String, String>,
}

impl PlayerSession {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            client_id: None,
            session_id: None,
            device_id: None,
            is_guest: false,
            metadata: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client_id.is_some()
    }
}

/// A join request as the executor sees it, after routing.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub request_id: String,
    /// Stable identity claimed by the joiner (from auth or join options).
    /// Without one, and absent a `canJoin` decision, a random player id is
    /// minted.
    pub player_id: Option<PlayerId>,
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub device_id: Option<DeviceId>,
    pub is_guest: bool,
    pub options: Option<serde_json::Value>,
    pub metadata: HashMap<String, String>,
}

/// Outcome of the admission pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    Allow(PlayerId),
    Deny(String),
}
