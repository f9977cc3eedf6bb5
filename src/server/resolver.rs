//! Resolver pipeline.
//!
//! Resolvers are where all non-determinism lives. A handler declaration
//! lists resolver executors; before the synchronous handler body runs, the
//! pipeline executes them (they may suspend and await external I/O) and
//! collects their outputs by name. Live outputs are captured into the
//! recorder; during re-evaluation the recorded outputs are returned directly
//! and the resolver bodies never execute.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::api::ident::{LandId, PlayerId};
use crate::determinism::rng::DeterministicRng;
use crate::record::ResolverOutput;
use crate::server::error::ResolverError;
use crate::state::snapshot::Snapshot;

/// Shared per-land services resolvers may draw on.
#[derive(Debug)]
pub struct LandServices {
    /// The land's deterministic RNG. Behind a mutex only because resolvers
    /// borrow the services immutably; the executor is serialized, so the
    /// lock is never contended.
    pub rng: Mutex<DeterministicRng>,
}

impl LandServices {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}

/// What a resolver sees: the land identity, the triggering payload, and a
/// read-only canonical view of the current state.
pub struct ResolverContext<'a> {
    pub land_id: &'a LandId,
    pub land_type: &'a str,
    /// The committed tick the handler will bind to.
    pub tick_id: i64,
    pub player_id: Option<&'a PlayerId>,
    pub action_payload: Option<&'a Value>,
    pub event_payload: Option<&'a Value>,
    pub current_state: &'a Snapshot,
    pub services: &'a LandServices,
}

/// A declared pre-handler executor.
pub trait Resolver: Send + Sync {
    /// Key under which the output is stored and recorded.
    fn name(&self) -> &str;

    /// Stable type id stored next to the recorded value.
    fn type_id(&self) -> &str;

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolverContext<'a>,
    ) -> BoxFuture<'a, Result<Value, ResolverError>>;
}

/// Run the declared resolvers in order and collect their outputs by name.
pub async fn run_pipeline(
    resolvers: &[Arc<dyn Resolver>],
    ctx: &ResolverContext<'_>,
) -> Result<BTreeMap<String, ResolverOutput>, ResolverError> {
    let mut outputs = BTreeMap::new();
    for resolver in resolvers {
        let value = resolver.resolve(ctx).await?;
        outputs.insert(
            resolver.name().to_string(),
            ResolverOutput {
                type_id: resolver.type_id().to_string(),
                value,
            },
        );
    }
    Ok(outputs)
}

/// Draws from the land's deterministic RNG. With a bound, the output is
/// `{"value": n}` for `n` in `[0, bound)`; unbounded it is a full `u64`.
pub struct RngResolver {
    name: String,
    bound: Option<u64>,
}

impl RngResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bound: None,
        }
    }

    pub fn bounded(name: impl Into<String>, bound: u64) -> Self {
        Self {
            name: name.into(),
            bound: Some(bound),
        }
    }
}

impl Resolver for RngResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_id(&self) -> &str {
        "rng.sample"
    }

    fn resolve<'a>(
        &'a self,
        ctx: &'a ResolverContext<'a>,
    ) -> BoxFuture<'a, Result<Value, ResolverError>> {
        Box::pin(async move {
            let mut rng = ctx
                .services
                .rng
                .lock()
                .map_err(|_| ResolverError::new(&self.name, "rng poisoned"))?;
            let value = match self.bound {
                Some(bound) => rng.next_below(bound),
                None => rng.next_u64(),
            };
            Ok(json!({ "value": value }))
        })
    }
}

/// The handler-visible wall clock. Reads the system clock at live time; the
/// recorded output is what replay sees, so handlers never observe a second
/// "now".
pub struct ClockResolver {
    name: String,
}

impl ClockResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Resolver for ClockResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_id(&self) -> &str {
        "clock.now"
    }

    fn resolve<'a>(
        &'a self,
        _ctx: &'a ResolverContext<'a>,
    ) -> BoxFuture<'a, Result<Value, ResolverError>> {
        Box::pin(async move {
            Ok(json!({
                "now": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(land_id: &'a LandId, state: &'a Snapshot, services: &'a LandServices) -> ResolverContext<'a> {
        ResolverContext {
            land_id,
            land_type: "arena",
            tick_id: -1,
            player_id: None,
            action_payload: None,
            event_payload: None,
            current_state: state,
            services,
        }
    }

    #[tokio::test]
    async fn pipeline_collects_outputs_in_declaration_order() {
        let land_id = LandId::new("arena", "m1");
        let state = Snapshot::new();
        let services = LandServices::new(DeterministicRng::for_land(&land_id));
        let resolvers: Vec<Arc<dyn Resolver>> = vec![
            Arc::new(RngResolver::bounded("roll", 6)),
            Arc::new(ClockResolver::new("now")),
        ];

        let ctx = context(&land_id, &state, &services);
        let outputs = run_pipeline(&resolvers, &ctx).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["roll"].type_id, "rng.sample");
        assert!(outputs["roll"].value["value"].as_u64().unwrap() < 6);
        assert_eq!(outputs["now"].type_id, "clock.now");
        assert!(outputs["now"].value["now"].is_string());
    }

    #[tokio::test]
    async fn rng_resolver_is_seed_deterministic() {
        let land_id = LandId::new("arena", "m1");
        let state = Snapshot::new();
        let mut rolls = Vec::new();
        for _ in 0..2 {
            let services = LandServices::new(DeterministicRng::for_land(&land_id));
            let resolver = RngResolver::new("roll");
            let ctx = context(&land_id, &state, &services);
            rolls.push(resolver.resolve(&ctx).await.unwrap());
        }
        assert_eq!(rolls[0], rolls[1]);
    }
}
