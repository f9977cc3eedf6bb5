//! UTF-8 JSON text channel.

use serde_json::Value;

use crate::api::error::CodecError;
use crate::api::schema::{Schema, SchemaType};

#[derive(Debug, Default, Clone, Copy)]
pub struct Json;

impl Schema for Json {
    fn schema_type() -> SchemaType {
        SchemaType::Text
    }

    fn to_bytes(value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|_| CodecError::Channel("json"))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|_| CodecError::Channel("json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip() {
        let value = json!({"kind": 104, "payload": [1, "x", null]});
        let bytes = Json::to_bytes(&value).unwrap();
        assert_eq!(Json::from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn garbage_is_a_channel_error() {
        assert_eq!(
            Json::from_bytes(b"{nope"),
            Err(CodecError::Channel("json"))
        );
    }
}
