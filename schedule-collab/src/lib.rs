//! # schedule-collab: Real-time schedule synchronization
//!
//! Lets several users edit one resource schedule at the same time. Each
//! peer keeps its own store, publishes its edits on a shared topic and
//! applies everyone else's.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   WebSocket    ┌──────────────────────┐
//! │ ReconciliationEngine │ ◄────────────► │ HubServer            │
//! │ (per peer)           │  JSON frames   │ (central)            │
//! └──────────┬───────────┘                └──────────┬───────────┘
//!            │                                       │
//!            ▼                                       ▼
//! ┌──────────────────────┐                ┌──────────────────────┐
//! │ ScheduleStore        │                │ Topic "scheduler"    │
//! │ (local replica)      │                │ history + fan-out    │
//! └──────────────────────┘                └──────────┬───────────┘
//!                                                    │
//!                                         ┌──────────┴───────────┐
//!                                         │ follower store       │
//!                                         │ GET /api/state       │
//!                                         └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Resources, events, snapshots, wire date format
//! - [`store`]: Single-writer schedule store with change notifications
//! - [`codec`]: Store changes ⇄ change operations ⇄ named JSON payloads
//! - [`protocol`]: Peer/hub frames
//! - [`broadcast`]: Topics with rewind history and presence
//! - [`server`]: WebSocket hub and state endpoint
//! - [`client`]: WebSocket channel client
//! - [`fetch`]: Initial snapshot retrieval
//! - [`reconcile`]: Watermark gate, echo suppression, remote apply
//! - [`gesture`]: Remote drag/resize presentation state
//! - [`presence`]: Online roster and display names

pub mod model;
pub mod error;
pub mod store;
pub mod codec;
pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod fetch;
pub mod reconcile;
pub mod gesture;
pub mod presence;

// Re-exports for convenience
pub use model::{DurationUnit, Event, EventId, EventType, Resource, ResourceId, ScheduleData, Snapshot};
pub use error::{
    CommitError, ConflictError, DecodeError, FetchError, ReconcileError, ServerError, TransportError,
};
pub use store::{ApplyReport, FieldDiff, ScheduleStore, StoreChange};
pub use codec::{ChangeOperation, Command, FieldChange, FieldPatch, ResizeEdge};
pub use protocol::{Frame, Member, PresenceAction, WireMessage, DEFAULT_REWIND, DEFAULT_TOPIC};
pub use broadcast::{Topic, TopicEvent, TopicRegistry, TopicStats};
pub use server::{HubConfig, HubServer, HubStats};
pub use client::{ChannelClient, ChannelEvent, ChannelHandle, ClientConfig, ConnectionState, Publisher};
pub use fetch::{HttpSnapshotSource, SnapshotSource};
pub use reconcile::{
    Committer, EchoGuard, EngineConfig, EngineStats, EngineView, ImmediateCommit, InboundOutcome,
    LocalChange, Phase, ReconciliationEngine,
};
pub use gesture::{GestureBoard, GestureKind, RemoteGesture, TimeAxis};
pub use presence::{PresenceRoster, USER_NAMES};
