//! Wire channel schemas.
//!
//! A schema turns a canonical frame value into channel bytes and back. The
//! text channel is UTF-8 JSON, the binary channel MessagePack; the framing
//! (JSON-object vs opcode-array) layered on top is independent of the
//! channel.

use serde_json::Value;

use crate::api::error::CodecError;

#[cfg(feature = "json")]
pub mod json;
#[cfg(feature = "msgpack")]
pub mod msgpack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Text,
    Binary,
}

pub trait Schema: Send + Sync + 'static {
    fn schema_type() -> SchemaType;


    fn to_bytes(value: &Value) -> Result<Vec<u8>, CodecError>;

    fn from_bytes(bytes: &[u8]) -> Result<Value, CodecError>;
}
