//! WebSocket channel client: attach to a hub topic, publish, receive.
//!
//! Provides:
//! - Connection lifecycle (connect, attach with rewind, disconnect)
//! - Non-blocking publish through a bounded outgoing queue
//! - Delivery of messages and presence changes as [`ChannelEvent`]s
//!
//! Messages the peer published itself are delivered back like any other
//! (the hub echoes by default); telling them apart is the consumer's job,
//! using the connection id from [`ChannelEvent::Attached`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::TransportError;
use crate::presence::random_user_name;
use crate::protocol::{Frame, Member, PresenceAction, WireMessage, DEFAULT_REWIND, DEFAULT_TOPIC};

/// Capability to publish a named change on the shared topic.
pub trait Publisher {
    fn publish(&self, name: &str, data: Value) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub WebSocket URL
    pub url: String,
    pub topic: String,
    /// Display name announced to the other peers
    pub client_id: String,
    /// History to replay on attach
    pub rewind: Duration,
    /// Outgoing and incoming queue length
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9090".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            client_id: random_user_name().to_string(),
            rewind: DEFAULT_REWIND,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Attached,
}

/// Events emitted by the channel client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Attach acknowledged; `connection_id` tags this peer's own messages.
    Attached {
        connection_id: Uuid,
        members: Vec<Member>,
    },
    Message(WireMessage),
    Presence {
        action: PresenceAction,
        member: Member,
    },
    /// The hub refused a frame.
    Error(String),
    Disconnected,
}

/// Cheap, cloneable publishing side of a connected client.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outgoing: mpsc::Sender<Frame>,
}

impl ChannelHandle {
    /// Keepalive; the hub answers with a pong.
    pub fn ping(&self) -> Result<(), TransportError> {
        self.enqueue(Frame::Ping, "ping")
    }

    fn enqueue(&self, frame: Frame, name: &str) -> Result<(), TransportError> {
        self.outgoing.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure {
                name: name.to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

impl Publisher for ChannelHandle {
    fn publish(&self, name: &str, data: Value) -> Result<(), TransportError> {
        self.enqueue(Frame::publish(name, data), name)
    }
}

pub struct ChannelClient {
    config: ClientConfig,
    state: Arc<RwLock<ConnectionState>>,
    connection_id: Arc<RwLock<Option<Uuid>>>,
    handle: Option<ChannelHandle>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
    event_tx: mpsc::Sender<ChannelEvent>,
}

impl ChannelClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connection_id: Arc::new(RwLock::new(None)),
            handle: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    /// Connect and attach to the configured topic.
    ///
    /// Spawns one writer and one reader task. The attach acknowledgement
    /// arrives asynchronously as [`ChannelEvent::Attached`].
    pub async fn connect(&mut self) -> Result<ChannelHandle, TransportError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.config.url).await {
            Ok(connected) => connected,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(TransportError::Connect {
                    url: self.config.url.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(self.config.queue_capacity.max(1));
        let handle = ChannelHandle { outgoing: out_tx };

        // Writer task: forward the outgoing queue to the socket
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        handle.enqueue(
            Frame::attach(&self.config.topic, &self.config.client_id, self.config.rewind),
            "attach",
        )?;

        // Reader task: turn frames into channel events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let connection_id = self.connection_id.clone();
        let topic = self.config.topic.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                let event = match Frame::decode(text.as_str()) {
                    Ok(Frame::Attached { connection_id: id, members, .. }) => {
                        *state.write().await = ConnectionState::Attached;
                        *connection_id.write().await = Some(id);
                        log::info!("Attached to {topic} as {id} ({} online)", members.len());
                        ChannelEvent::Attached {
                            connection_id: id,
                            members,
                        }
                    }
                    Ok(Frame::Message(message)) => ChannelEvent::Message(message),
                    Ok(Frame::Presence { action, member }) => ChannelEvent::Presence { action, member },
                    Ok(Frame::Error { reason }) => {
                        log::warn!("Hub refused a frame: {reason}");
                        ChannelEvent::Error(reason)
                    }
                    Ok(Frame::Pong) => {
                        log::trace!("pong");
                        continue;
                    }
                    Ok(other) => {
                        log::debug!("Ignoring peer-bound frame {other:?}");
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame from hub: {e}");
                        continue;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    break;
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            *connection_id.write().await = None;
            let _ = event_tx.send(ChannelEvent::Disconnected).await;
        });

        self.handle = Some(handle.clone());
        Ok(handle)
    }

    pub fn handle(&self) -> Option<&ChannelHandle> {
        self.handle.as_ref()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn connection_id(&self) -> Option<Uuid> {
        *self.connection_id.read().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
