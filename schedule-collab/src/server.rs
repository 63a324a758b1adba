//! Hub server: topic endpoint over WebSocket and the state endpoint over HTTP.
//!
//! Architecture:
//! ```text
//! Peer A ──┐  ws (Frame JSON)
//!          ├── connection task ── Topic "scheduler" ── broadcast ──► Peer A, B, …
//! Peer B ──┘                            │
//!                                       ▼
//!                               follower task (single writer)
//!                               ScheduleStore ── watch<Arc<Snapshot>>
//!                                                      │
//!                                      GET /api/state ◄┘
//! ```
//!
//! The follower subscribes to the topic before the accept loop starts, so
//! the served snapshot reflects every change the hub has relayed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::broadcast::{Topic, TopicEvent, TopicRegistry};
use crate::codec::{self, ChangeOperation};
use crate::error::ServerError;
use crate::model::Snapshot;
use crate::protocol::{Frame, Member, WireMessage, DEFAULT_TOPIC};
use crate::store::ScheduleStore;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket listen address
    pub ws_addr: String,
    /// HTTP listen address for `/api/state`
    pub http_addr: String,
    /// Topic whose changes the state endpoint follows
    pub topic: String,
    /// Per-subscriber buffer and history length
    pub broadcast_capacity: usize,
    /// How long published messages stay replayable
    pub history_window: Duration,
    /// Deliver a publisher's own messages back to it
    pub echo_messages: bool,
    /// Schedule served before any change arrives
    pub seed: Snapshot,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ws_addr: "127.0.0.1:9090".to_string(),
            http_addr: "127.0.0.1:3000".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            broadcast_capacity: 256,
            history_window: Duration::from_secs(120),
            echo_messages: true,
            seed: Snapshot::demo(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub rejected_frames: u64,
}

/// State shared with the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    snapshot: watch::Receiver<Arc<Snapshot>>,
}

impl HttpState {
    pub fn new(snapshot: watch::Receiver<Arc<Snapshot>>) -> Self {
        Self { snapshot }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /api/state
async fn get_state(State(state): State<HttpState>) -> Json<Snapshot> {
    let snapshot = state.snapshot.borrow().clone();
    Json(Snapshot::clone(&snapshot))
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/health", get(health_check))
        .with_state(state)
}

pub struct HubServer {
    config: HubConfig,
    registry: Arc<TopicRegistry>,
    stats: Arc<RwLock<HubStats>>,
    state_tx: Arc<watch::Sender<Arc<Snapshot>>>,
    state_rx: watch::Receiver<Arc<Snapshot>>,
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        let registry = Arc::new(TopicRegistry::new(
            config.broadcast_capacity,
            config.history_window,
        ));
        let (state_tx, state_rx) = watch::channel(Arc::new(config.seed.clone()));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(HubStats::default())),
            state_tx: Arc::new(state_tx),
            state_rx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Bind both listeners and serve until the WebSocket listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let topic = self.registry.get_or_create(&self.config.topic).await;
        self.spawn_follower(topic);

        let http = bind(&self.config.http_addr).await?;
        let app = router(HttpState::new(self.state_rx.clone()));
        log::info!("State endpoint listening on http://{}/api/state", self.config.http_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http, app).await {
                log::error!("State endpoint stopped: {e}");
            }
        });

        let listener = bind(&self.config.ws_addr).await?;
        log::info!("Hub listening on ws://{}", self.config.ws_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let echo = self.config.echo_messages;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, echo).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Keep a hub-owned store in step with the topic and publish snapshots.
    fn spawn_follower(&self, topic: Arc<Topic>) {
        let mut store = ScheduleStore::from_snapshot(self.config.seed.clone());
        let mut receiver = topic.subscribe(Duration::ZERO).receiver;
        let state_tx = self.state_tx.clone();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(TopicEvent::Message(message)) => {
                        if follow(&mut store, &message.name, &message.data, message.timestamp) {
                            state_tx.send_replace(Arc::new(store.snapshot()));
                        }
                    }
                    Ok(TopicEvent::Presence { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("State follower lagged by {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<TopicRegistry>,
        stats: Arc<RwLock<HubStats>>,
        echo_messages: bool,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut attached: Option<(Arc<Topic>, Member)> = None;
        let mut topic_rx: Option<broadcast::Receiver<TopicEvent>> = None;

        let result: Result<(), ServerError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        {
                            let mut s = stats.write().await;
                            s.total_frames += 1;
                            s.total_bytes += text.len() as u64;
                        }

                        let frame = match Frame::decode(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("Failed to decode frame from {addr}: {e}");
                                stats.write().await.rejected_frames += 1;
                                send_frame(&mut ws_sender, &Frame::error(e.to_string())).await?;
                                continue;
                            }
                        };

                        match frame {
                            Frame::Attach { topic, client_id, rewind_ms } => {
                                if attached.is_some() {
                                    log::warn!("Second attach to {topic} from {addr} refused");
                                    send_frame(&mut ws_sender, &Frame::error("already attached")).await?;
                                    continue;
                                }

                                let topic = registry.get_or_create(&topic).await;
                                let member = Member::new(client_id);
                                let subscription = topic
                                    .attach(member.clone(), Duration::from_millis(rewind_ms))
                                    .await;

                                send_frame(&mut ws_sender, &Frame::Attached {
                                    topic: topic.name().to_string(),
                                    connection_id: member.connection_id,
                                    members: topic.members().await,
                                }).await?;
                                for message in &subscription.backlog {
                                    send_frame(&mut ws_sender, &Frame::Message(WireMessage::clone(message))).await?;
                                }

                                log::info!(
                                    "{} ({}) attached to {} with {} replayed",
                                    member.client_id,
                                    member.connection_id,
                                    topic.name(),
                                    subscription.backlog.len()
                                );
                                topic_rx = Some(subscription.receiver);
                                attached = Some((topic, member));
                            }
                            Frame::Publish { name, data } => match &attached {
                                Some((topic, member)) => {
                                    topic.publish(name, data, member);
                                }
                                None => {
                                    log::warn!("Publish of {name} from {addr} before attach");
                                    send_frame(&mut ws_sender, &Frame::error("not attached")).await?;
                                }
                            },
                            Frame::Ping => send_frame(&mut ws_sender, &Frame::Pong).await?,
                            Frame::Detach => break,
                            other => {
                                log::debug!("Ignoring hub-bound frame {other:?} from {addr}");
                            }
                        }
                    }

                    event = async {
                        match topic_rx.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => {
                        let own_id = attached.as_ref().map(|(_, member)| member.connection_id);
                        match event {
                            Ok(TopicEvent::Message(message)) => {
                                if !echo_messages && Some(message.connection_id) == own_id {
                                    continue;
                                }
                                send_frame(&mut ws_sender, &Frame::Message(WireMessage::clone(&message))).await?;
                            }
                            // Own entry is already in the attach acknowledgement
                            Ok(TopicEvent::Presence { member, .. }) if Some(member.connection_id) == own_id => {}
                            Ok(TopicEvent::Presence { action, member }) => {
                                send_frame(&mut ws_sender, &Frame::Presence { action, member }).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Connection {own_id:?} lagged by {n} messages");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
            Ok::<(), ServerError>(())
        }
        .await;

        if let Some((topic, member)) = attached {
            topic.detach(&member.connection_id).await;
            log::info!("{} left {}", member.client_id, topic.name());
        }
        stats.write().await.active_connections -= 1;

        result
    }

    pub async fn stats(&self) -> HubStats {
        self.stats.read().await.clone()
    }

    /// Snapshot currently served by `/api/state`.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state_rx.borrow().clone()
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), ServerError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = frame.encode()?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Apply one relayed message to the hub store. Returns whether it changed.
///
/// Gestures are presentation-only and never reach the store.
pub(crate) fn follow(store: &mut ScheduleStore, name: &str, data: &serde_json::Value, timestamp: u64) -> bool {
    if !store.is_fresh(timestamp) {
        log::warn!("State follower skipping stale {name} at {timestamp}");
        return false;
    }

    let report = match codec::decode(name, data) {
        Ok(ChangeOperation::AddEvent { records }) => store.apply_add(records, timestamp),
        Ok(ChangeOperation::UpdateEvent { id, patch }) => {
            for (field, e) in &patch.rejected {
                log::warn!("State follower dropped {field} of event {id}: {e}");
            }
            store.apply_update(id, &patch, timestamp)
        }
        Ok(ChangeOperation::RemoveEvent { ids }) => store.apply_remove(&ids, timestamp),
        Ok(ChangeOperation::DragEvent { .. } | ChangeOperation::ResizeEvent { .. }) => return false,
        Err(e) => {
            log::warn!("State follower could not decode {name}: {e}");
            return false;
        }
    };

    if let Err(e) = store.commit() {
        log::error!("State follower commit failed: {e}");
    }
    log::debug!("State follower applied {name} ({} records) at {timestamp}", report.applied);
    true
}
