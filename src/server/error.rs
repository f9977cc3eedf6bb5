//! Server-side operational errors.

use thiserror::Error;

use crate::api::error::WireError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport failed to start: {0}")]
    StartFailure(String),
    #[error("land type `{0}` is not registered")]
    LandTypeNotFound(String),
    #[error("land `{0}` is gone")]
    LandClosed(String),
    #[error("connection is not joined to any land")]
    NotJoined,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Failures raised inside a handler body. They surface as error frames for
/// the originating request and never terminate the executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Failures raised by a resolver executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("resolver `{name}` failed: {message}")]
pub struct ResolverError {
    pub name: String,
    pub message: String,
}

impl ResolverError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}
