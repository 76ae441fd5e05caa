use thiserror::Error;

use crate::envelope::DecodeError;
use crate::registry::HandlerKind;

/// Errors that escape `Dispatcher::receive_once`. Everything else is reported
/// and absorbed so the receive loop keeps going.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to decode envelope at {topic}:{partition}@{offset}: {source}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: DecodeError,
    },
}

/// A single handler's failure. Never stops sibling handlers from running.
#[derive(Error, Debug)]
pub enum HandlerFault {
    #[error("{kind} for {message_type} failed: {error:#}")]
    Failed {
        message_type: String,
        kind: HandlerKind,
        error: anyhow::Error,
    },
    #[error("{kind} for {message_type} panicked: {message}")]
    Panicked {
        message_type: String,
        kind: HandlerKind,
        message: String,
    },
}
