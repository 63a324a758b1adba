//! Error taxonomy for the sync layers.
//!
//! Every error is contained by the layer that detects it: the reconcile
//! loop logs and continues, it never unwinds on any of these.

use thiserror::Error;

use crate::model::EventId;

/// Connect/publish/subscribe failures on the broadcast channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("channel closed")]
    Closed,

    #[error("outgoing queue full, dropped {name}")]
    Backpressure { name: String },
}

/// Malformed inbound payloads. Field-level: the rest of the message still applies.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("missing field {0:?}")]
    MissingField(&'static str),

    #[error("field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("invalid date {0:?}")]
    InvalidDate(String),

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Store-level id conflicts. Logged, the offending record is a no-op.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConflictError {
    #[error("event with id {0} already exists, skipping addition")]
    DuplicateId(EventId),

    #[error("event with id {0} does not exist")]
    UnknownId(EventId),

    #[error("event {0} would end before it starts")]
    InvalidRange(EventId),
}

/// The store failed to finalise a batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommitError {
    #[error("record {0} vanished before it was confirmed")]
    MissingRecord(EventId),

    #[error("commit aborted: {0}")]
    Aborted(String),
}

/// Initial snapshot fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("state endpoint answered {0}")]
    Status(u16),

    #[error("state request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("state body unreadable: {0}")]
    Body(String),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("event {id} is being manipulated by {user_name}")]
    Locked { id: EventId, user_name: String },

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Hub startup and connection errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
