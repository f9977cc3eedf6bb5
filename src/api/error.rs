//! Wire-level error taxonomy.
//!
//! Errors that cross the transport carry the originating request id so the
//! client can reject the matching pending request. Handler and resolver
//! failures are caught at the executor boundary and surfaced as error frames;
//! they never poison a land.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("action `{0}` is not registered")]
    ActionNotRegistered(String),
    #[error("event `{0}` is not registered")]
    EventNotRegistered(String),
    #[error("join denied: {0}")]
    JoinDenied(String),
    #[error("land is full")]
    RoomFull,
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("handler failed: {0}")]
    HandlerFailure(String),
    #[error("resolver `{0}` failed")]
    ResolverFailure(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl WireError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ActionNotRegistered(_) => ErrorCode::ActionNotRegistered,
            Self::EventNotRegistered(_) => ErrorCode::EventNotRegistered,
            Self::JoinDenied(_) => ErrorCode::JoinDenied,
            Self::RoomFull => ErrorCode::RoomFull,
            Self::DecodeError(_) => ErrorCode::DecodeError,
            Self::HandlerFailure(_) => ErrorCode::HandlerFailure,
            Self::ResolverFailure(_) => ErrorCode::ResolverFailure,
            Self::InternalError(_) => ErrorCode::InternalError,
        }
    }
}

/// Stable wire identifiers for [`WireError`] kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    ActionNotRegistered,
    EventNotRegistered,
    JoinDenied,
    RoomFull,
    DecodeError,
    HandlerFailure,
    ResolverFailure,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActionNotRegistered => "actionNotRegistered",
            Self::EventNotRegistered => "eventNotRegistered",
            Self::JoinDenied => "joinDenied",
            Self::RoomFull => "roomFull",
            Self::DecodeError => "decodeError",
            Self::HandlerFailure => "handlerFailure",
            Self::ResolverFailure => "resolverFailure",
            Self::InternalError => "internalError",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "actionNotRegistered" => Self::ActionNotRegistered,
            "eventNotRegistered" => Self::EventNotRegistered,
            "joinDenied" => Self::JoinDenied,
            "roomFull" => Self::RoomFull,
            "decodeError" => Self::DecodeError,
            "handlerFailure" => Self::HandlerFailure,
            "resolverFailure" => Self::ResolverFailure,
            "internalError" => Self::InternalError,
            _ => return None,
        })
    }
}

/// Identifier parsing failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("malformed identifier `{0}`")]
    Malformed(String),
}

/// Frame encode/decode failures. These stay on the local side of the wire;
/// the offending frame is logged and dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame is not valid {0}")]
    Channel(&'static str),
    #[error("unknown message kind {0}")]
    UnknownKind(i64),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown path hash {0:#x}")]
    UnknownPathHash(u32),
    #[error("slot {0} referenced before definition")]
    UndefinedSlot(u32),
    #[error("slot {0} already defined")]
    SlotRedefined(u32),
    #[error("event `{0}` has no declared field order")]
    UnknownEventShape(String),
}
