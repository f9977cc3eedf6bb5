// Determinism services: seeded RNG, fixed-rate tick clock, canonical hashing.
//
// Handlers must be pure functions of (state, resolver outputs, payload,
// context). Anything non-deterministic they need flows through these
// services, behind a resolver, so it is recorded live and replayed verbatim.

pub mod clock;
pub mod hash;
pub mod rng;
