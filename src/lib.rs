// Tempest is an authoritative-server multiplayer state synchronization runtime.
//
// The server owns long-lived Lands. Each Land keeps an authoritative state
// tree, ingests client inputs, advances deterministically on a fixed tick and
// replicates state changes to connected clients over a duplex transport. A
// companion client SDK mirrors the state, dispatches intents and observes
// server-emitted events.
//
// Layering:
//
// api          - wire surface shared by both halves: typed ids, fixed-point
//                math, frames and opcodes, framing codec, patch compression,
//                channel schemas (JSON text / MessagePack binary).
//
// state        - the authoritative state tree model: visibility-annotated
//                leaves with dirty tracking, canonical snapshots per
//                visibility mode, snapshot diffing and per-client baselines.
//
// determinism  - seeded RNG, fixed-rate tick clock, canonical FNV-1a hashing.
//                Everything non-deterministic a handler needs flows through a
//                resolver so it can be recorded and replayed.
//
// record       - tick-ordered input recording and offline re-evaluation that
//                reproduces the identical timeline from a record file.
//
// server       - the per-Land serialized executor, land registry and session
//                router, resolver pipeline and transport adapters.
//
// client       - mirrored land state, request correlation, typed event
//                subscriptions and the client transport.

pub mod api;
pub mod determinism;
pub mod record;
pub mod state;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;
