// The authoritative server half.

use std::sync::Arc;

use crate::api::schema::Schema;
use crate::server::definition::LandDefinition;
use crate::server::error::ServerError;
use crate::server::protocol::{NetworkProtocol, SessionManager};
use crate::server::registry::{LandRegistry, Router, TypedLandFactory};
use crate::state::LandState;

pub mod context;
pub mod definition;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod session;

/// The server: a transport, a channel schema, and the registered land types.
pub struct TempestServer<N, S>
where
    N: NetworkProtocol,
    S: Schema,
{
    protocol: N,
    registry: LandRegistry,
    sessions: Arc<SessionManager<S>>,
}

impl<N, S> TempestServer<N, S>
where
    N: NetworkProtocol,
    S: Schema,
{
    pub fn new(protocol: N, _schema: S) -> Self {
        Self {
            protocol,
            registry: LandRegistry::new(),
            sessions: Arc::new(SessionManager::new()),
        }
    }

    /// Register a land type: its definition plus a constructor for fresh
    /// instance state.
    pub fn register<St, F>(mut self, definition: LandDefinition<St>, initial: F) -> Self
    where
        St: LandState,
        F: Fn() -> St + Send + Sync + 'static,
    {
        self.registry
            .register(Arc::new(TypedLandFactory::new(definition, initial)));
        self
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let router = Arc::new(Router::new(self.registry, Arc::clone(&self.sessions)));
        self.protocol.run::<S>(self.sessions, router).await
    }
}
