//! Client-side operational errors.

use thiserror::Error;

use crate::api::error::ErrorCode;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("connection failed")]
    ConnectionFailure,
    #[error("request timed out")]
    Timeout,
    #[error("join denied: {0}")]
    JoinFailure(String),
    #[error("not joined to any land")]
    NotJoined,
    #[error("frame decode failed: {0}")]
    DecodeError(String),
    #[error("server error {code:?}: {message}")]
    Server { code: ErrorCode, message: String },
}
