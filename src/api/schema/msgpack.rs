//! MessagePack binary channel.

use serde_json::Value;

use crate::api::error::CodecError;
use crate::api::schema::{Schema, SchemaType};

#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPack;

impl Schema for MsgPack {
    fn schema_type() -> SchemaType {
        SchemaType::Binary
    }

    fn to_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(value).map_err(|_| CodecError::Channel("msgpack"))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Value, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|_| CodecError::Channel("msgpack"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip() {
        let value = json!([107, [2, ["/round", 1, 3]], []]);
        let bytes = MsgPack::to_bytes(&value).unwrap();
        assert_eq!(MsgPack::from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn binary_is_denser_than_text_for_opcode_frames() {
        let value = json!([101, "req-1", "Move", "eyJkeCI6MX0="]);
        let packed = MsgPack::to_bytes(&value).unwrap();
        let text = serde_json::to_vec(&value).unwrap();
        assert!(packed.len() < text.len());
    }

    #[test]
    fn garbage_is_a_channel_error() {
        assert_eq!(
            MsgPack::from_bytes(&[0xc1]),
            Err(CodecError::Channel("msgpack"))
        );
    }
}
