//! Wire protocol between peers and the hub.
//!
//! Frames are JSON text messages over one WebSocket, tagged by `type`:
//!
//! ```text
//! peer ──► hub    attach { topic, clientId, rewindMs }
//!                 publish { name, data }
//!                 detach | ping
//!
//! hub ──► peer    attached { topic, connectionId, members }
//!                 message { id, name, data, clientId, connectionId, timestamp }
//!                 presence { action, member }
//!                 error { reason } | pong
//! ```
//!
//! A `message` timestamp is assigned by the hub when it accepts the
//! publish; it is strictly increasing per topic and is the value peers use
//! as their watermark.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DecodeError;

/// Topic the schedule changes are published on.
pub const DEFAULT_TOPIC: &str = "scheduler";

/// History replayed to a peer when it attaches.
pub const DEFAULT_REWIND: Duration = Duration::from_secs(5);

/// A participant attached to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub connection_id: Uuid,
    /// Display name of the user behind the connection.
    pub client_id: String,
}

impl Member {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            client_id: client_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Enter,
    Leave,
}

/// A published change as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: Uuid,
    /// Command name (`updateEvent`, `addEvent`, …).
    pub name: String,
    pub data: Value,
    pub client_id: String,
    pub connection_id: Uuid,
    /// Delivery timestamp in milliseconds since the epoch.
    pub timestamp: u64,
}

/// Top-level frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Frame {
    Attach {
        topic: String,
        client_id: String,
        #[serde(default)]
        rewind_ms: u64,
    },
    Publish {
        name: String,
        data: Value,
    },
    Detach,
    Ping,

    Attached {
        topic: String,
        connection_id: Uuid,
        members: Vec<Member>,
    },
    Message(WireMessage),
    Presence {
        action: PresenceAction,
        member: Member,
    },
    Error {
        reason: String,
    },
    Pong,
}

impl Frame {
    pub fn attach(topic: impl Into<String>, client_id: impl Into<String>, rewind: Duration) -> Self {
        Frame::Attach {
            topic: topic.into(),
            client_id: client_id.into(),
            rewind_ms: rewind.as_millis() as u64,
        }
    }

    pub fn publish(name: impl Into<String>, data: Value) -> Self {
        Frame::Publish {
            name: name.into(),
            data,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Frame::Error {
            reason: reason.into(),
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}
