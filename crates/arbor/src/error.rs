//! # Runtime Errors
//!
//! Errors are split by who produces them:
//!
//! - [`ActorError`] is what user code returns from hooks and behaviors. It travels
//!   up the tree inside failure reports, so it is cheap to clone.
//! - [`RuntimeError`] is what the runtime itself returns to callers (creation,
//!   resolution, shutdown).
//! - [`TransportError`] and [`CodecError`] cover the remote layer.

use std::sync::Arc;

/// A failure raised inside an actor.
///
/// Running-phase failures are never swallowed: the engine turns them into a
/// failure report for the parent, whose supervision strategy decides what happens.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActorError {
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
    #[error("empty behavior stack on unbecome")]
    EmptyBehaviorStack,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ActorError {
    pub fn msg(message: impl Into<String>) -> Self {
        ActorError::Failed(message.into())
    }

    /// Wraps any error type so it can be returned from a behavior.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ActorError::Custom(Arc::new(error))
    }
}

impl From<serde_json::Error> for ActorError {
    fn from(e: serde_json::Error) -> Self {
        ActorError::Persistence(e.to_string())
    }
}

/// Errors returned by the runtime to its callers.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("could not instantiate actor: {0}")]
    Instantiation(String),
    #[error("actor system stopped")]
    SystemStopped,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("{0} cannot accept messages")]
    Undeliverable(String),
    #[error("{0} is remote")]
    Remote(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors from the outbound pool or the inbound listener.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("could not connect to {host} after {attempts} attempts")]
    ConnectFailed { host: String, attempts: u32 },
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("connection pool closed")]
    PoolClosed,
}

/// Errors turning payloads into bytes and back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("no wire encoding registered for {0}")]
    UnregisteredType(&'static str),
    #[error("unknown type tag: {0}")]
    UnknownTypeTag(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn custom_error_keeps_source_message() {
        let err = ActorError::custom(DiskError);
        assert_eq!(err.to_string(), "disk on fire");
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), err.to_string());
    }

    #[test]
    fn transport_error_converts_into_runtime_error() {
        let err: RuntimeError = TransportError::PoolClosed.into();
        assert!(matches!(err, RuntimeError::Transport(TransportError::PoolClosed)));
    }
}
