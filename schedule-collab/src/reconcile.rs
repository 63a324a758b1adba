//! Reconciliation engine: one peer's view of the shared schedule.
//!
//! The engine owns the peer's [`ScheduleStore`] and is its only writer. It
//! runs on a single task and sees two inputs in arrival order:
//!
//! ```text
//! local edit ──► store apply ──► StoreChange ──► encode ──► publish
//!                                     ▲
//!                                     │ suppressed while the guard is set
//!                                     │
//! channel msg ─► fresh? ─► guard set ─► decode ─► store apply
//!                (skip)                  ─► range ─► commit ─► guard clear
//! ```
//!
//! The only suspension points are the initial snapshot fetch and the
//! commit await. Messages arriving meanwhile wait in the channel queue.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::{ChannelEvent, Publisher};
use crate::codec::{self, ChangeOperation, FieldPatch, ResizeEdge};
use crate::error::{CommitError, ReconcileError};
use crate::fetch::SnapshotSource;
use crate::gesture::{GestureBoard, RemoteGesture, TimeAxis, DEFAULT_VIEW_WIDTH};
use crate::model::{Event, EventId};
use crate::presence::{random_user_name, PresenceRoster};
use crate::protocol::WireMessage;
use crate::store::{ApplyReport, ScheduleStore, StoreChange};

/// Waits for the widget's derived data to settle after a batch of changes.
#[async_trait]
pub trait Committer: Send {
    async fn commit(&mut self) -> Result<(), CommitError>;
}

/// Committer with nothing to wait for.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateCommit;

#[async_trait]
impl Committer for ImmediateCommit {
    async fn commit(&mut self) -> Result<(), CommitError> {
        Ok(())
    }
}

/// Suppress-echo flag. While set, store notifications are not published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoGuard {
    active: bool,
}

impl EchoGuard {
    pub fn set(&mut self) {
        self.active = true;
    }

    pub fn clear(&mut self) {
        self.active = false;
    }

    pub fn is_set(&self) -> bool {
        self.active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    ApplyingRemote,
    /// A local add is waiting for its commit.
    AwaitingConfirmation,
}

/// A mutation or gesture made by the local user.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    Add(Vec<Event>),
    Update {
        id: EventId,
        patch: FieldPatch,
    },
    Remove(Vec<EventId>),
    Drag {
        id: EventId,
    },
    Resize {
        id: EventId,
        edge: ResizeEdge,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
    },
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Not newer than the watermark.
    Stale,
    /// Could not be decoded at all.
    Rejected,
    Applied(ApplyReport),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name sent with local drag/resize gestures.
    pub user_name: String,
    /// Rendered width of the time axis.
    pub view_width: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_name: random_user_name().to_string(),
            view_width: DEFAULT_VIEW_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub messages_applied: u64,
    /// Own messages received back from the hub.
    pub echoes_applied: u64,
    pub stale_skipped: u64,
    pub decode_failures: u64,
    pub published: u64,
    pub publish_failures: u64,
}

/// Read-only summary of what the widget would show.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineView {
    pub time_span: Option<(NaiveDateTime, NaiveDateTime)>,
    pub gestures: Vec<(EventId, RemoteGesture)>,
    pub online: Vec<String>,
}

pub struct ReconciliationEngine<P, C = ImmediateCommit> {
    config: EngineConfig,
    store: ScheduleStore,
    publisher: P,
    committer: C,
    guard: EchoGuard,
    phase: Phase,
    connection_id: Option<Uuid>,
    axis: Option<TimeAxis>,
    gestures: GestureBoard,
    roster: PresenceRoster,
    stats: EngineStats,
}

impl<P: Publisher> ReconciliationEngine<P, ImmediateCommit> {
    pub fn with_defaults(publisher: P) -> Self {
        Self::new(EngineConfig::default(), publisher, ImmediateCommit)
    }
}

impl<P: Publisher, C: Committer> ReconciliationEngine<P, C> {
    pub fn new(config: EngineConfig, publisher: P, committer: C) -> Self {
        Self {
            config,
            store: ScheduleStore::new(),
            publisher,
            committer,
            guard: EchoGuard::default(),
            phase: Phase::Idle,
            connection_id: None,
            axis: None,
            gestures: GestureBoard::new(),
            roster: PresenceRoster::new(),
            stats: EngineStats::default(),
        }
    }

    /// Connection id whose messages are this peer's own echoes.
    pub fn set_connection_id(&mut self, connection_id: Option<Uuid>) {
        self.connection_id = connection_id;
    }

    // ─── Local path ─────────────────────────────────────────────

    /// Apply an edit made by the local user and publish what it changed.
    ///
    /// Adds stay unpublished until [`commit`](Self::commit) confirms them.
    pub fn local_edit(&mut self, change: LocalChange) -> Result<ApplyReport, ReconcileError> {
        // Local edits never move the watermark.
        let now = self.store.timestamp();
        let report = match change {
            LocalChange::Add(records) => self.store.apply_add(records, now),
            LocalChange::Update { id, patch } => self.store.apply_update(id, &patch, now),
            LocalChange::Remove(ids) => self.store.apply_remove(&ids, now),
            LocalChange::Drag { id } => {
                self.check_unlocked(id)?;
                if self.store.contains(id) {
                    self.publish_operation(ChangeOperation::DragEvent {
                        id,
                        user_name: self.config.user_name.clone(),
                    });
                }
                return Ok(ApplyReport::default());
            }
            LocalChange::Resize {
                id,
                edge,
                start_date,
                end_date,
            } => {
                self.check_unlocked(id)?;
                if self.store.contains(id) {
                    self.publish_operation(ChangeOperation::ResizeEvent {
                        id,
                        user_name: self.config.user_name.clone(),
                        edge,
                        start_date,
                        end_date,
                    });
                }
                return Ok(ApplyReport::default());
            }
        };

        for change in self.store.take_changes() {
            self.on_store_change(change);
        }
        self.recompute_range();
        Ok(report)
    }

    fn check_unlocked(&self, id: EventId) -> Result<(), ReconcileError> {
        match self.gestures.get(id) {
            Some(gesture) => Err(ReconcileError::Locked {
                id,
                user_name: gesture.user_name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Route one store notification to the channel.
    pub fn on_store_change(&mut self, change: StoreChange) {
        if self.guard.is_set() {
            log::trace!("Suppressed store change while applying remote");
            return;
        }

        if let StoreChange::Add { .. } = change {
            self.phase = Phase::AwaitingConfirmation;
            return;
        }

        if let Some(operation) = codec::encode(&change) {
            self.publish_operation(operation);
        }
    }

    fn publish_operation(&mut self, operation: ChangeOperation) {
        match self.publisher.publish(operation.name(), operation.to_payload()) {
            Ok(()) => {
                log::debug!("Published {}", operation.name());
                self.stats.published += 1;
            }
            Err(e) => {
                log::warn!("Dropped {}: {e}", operation.name());
                self.stats.publish_failures += 1;
            }
        }
    }

    /// Wait for the committer, then confirm pending adds and publish them.
    ///
    /// When the committer fails nothing is confirmed, so the pending adds
    /// are retried by the next commit.
    pub async fn commit(&mut self) -> Result<(), ReconcileError> {
        self.committer.commit().await?;
        let changes = self.store.commit();
        self.phase = Phase::Idle;

        for change in changes? {
            self.on_store_change(change);
        }
        self.recompute_range();
        Ok(())
    }

    // ─── Remote path ────────────────────────────────────────────

    /// Apply one message received on the channel.
    ///
    /// Own messages take the same path: applying one is a no-op unless a
    /// concurrent edit landed before it in topic order. The guard is
    /// cleared on every exit, including a failed commit.
    pub async fn handle_inbound(&mut self, message: &WireMessage) -> Result<InboundOutcome, ReconcileError> {
        if !self.store.is_fresh(message.timestamp) {
            log::warn!(
                "Skipping stale {} at {} (watermark {})",
                message.name,
                message.timestamp,
                self.store.timestamp()
            );
            self.stats.stale_skipped += 1;
            return Ok(InboundOutcome::Stale);
        }

        // Confirm local adds first so their addEvent is not swallowed below.
        if self.store.has_uncommitted() {
            if let Err(e) = self.commit().await {
                log::error!("Commit before applying {} failed: {e}", message.name);
            }
        }
        let local_pending = self.store.uncommitted().to_vec();

        self.guard.set();
        self.phase = Phase::ApplyingRemote;
        let outcome = self.apply_remote(message);
        let settled = match outcome {
            InboundOutcome::Applied(_) => self.settle(&local_pending).await,
            _ => Ok(Vec::new()),
        };
        self.guard.clear();
        self.phase = if self.store.has_uncommitted() {
            Phase::AwaitingConfirmation
        } else {
            Phase::Idle
        };

        let confirmed = settled?;
        if !confirmed.is_empty() {
            self.publish_operation(ChangeOperation::AddEvent { records: confirmed });
        }
        Ok(outcome)
    }

    fn apply_remote(&mut self, message: &WireMessage) -> InboundOutcome {
        let own = Some(message.connection_id) == self.connection_id;
        if own {
            log::debug!("Applying own {} ({})", message.name, message.id);
            self.stats.echoes_applied += 1;
        }

        let operation = match codec::decode(&message.name, &message.data) {
            Ok(operation) => operation,
            Err(e) => {
                log::warn!("Failed to decode {} from {}: {e}", message.name, message.client_id);
                self.stats.decode_failures += 1;
                return InboundOutcome::Rejected;
            }
        };

        let ts = message.timestamp;
        let report = match operation {
            ChangeOperation::AddEvent { records } => self.store.apply_add(records, ts),
            ChangeOperation::UpdateEvent { id, patch } => {
                for (key, e) in &patch.rejected {
                    log::warn!("Skipping field {key} of updateEvent {id}: {e}");
                }
                let report = self.store.apply_update(id, &patch, ts);
                if self.store.contains(id) && self.gestures.clear(id).is_some() {
                    log::trace!("Remote gesture on {id} finished");
                }
                report
            }
            ChangeOperation::RemoveEvent { ids } => {
                let report = self.store.apply_remove(&ids, ts);
                let store = &self.store;
                self.gestures.retain(|id| store.contains(id));
                report
            }
            // Own gestures only mark the record for the other peers.
            ChangeOperation::DragEvent { .. } | ChangeOperation::ResizeEvent { .. } if own => ApplyReport::default(),
            ChangeOperation::DragEvent { id, user_name } => {
                if self.store.contains(id) {
                    let user_name = origin_name(user_name, message);
                    self.gestures.begin_drag(id, user_name);
                }
                ApplyReport::default()
            }
            ChangeOperation::ResizeEvent {
                id,
                user_name,
                edge,
                start_date,
                end_date,
            } => {
                if self.store.contains(id) {
                    let width = self
                        .axis
                        .map(|axis| axis.width_between(start_date, end_date))
                        .unwrap_or(0.0);
                    let user_name = origin_name(user_name, message);
                    self.gestures.begin_resize(id, user_name, edge, width);
                }
                ApplyReport::default()
            }
        };

        self.recompute_range();
        self.stats.messages_applied += 1;
        InboundOutcome::Applied(report)
    }

    /// Commit under the guard and drop the notifications it raises.
    ///
    /// Returns the records of `local_pending` confirmed by this commit; the
    /// caller publishes them once the guard is clear. On committer failure
    /// everything except `local_pending` is settled without confirmation.
    async fn settle(&mut self, local_pending: &[EventId]) -> Result<Vec<Event>, ReconcileError> {
        if let Err(e) = self.committer.commit().await {
            self.store.discard_pending(|id| !local_pending.contains(&id));
            return Err(e.into());
        }

        let mut confirmed = Vec::new();
        for change in self.store.commit()? {
            match change {
                StoreChange::AddConfirmed { records } => {
                    confirmed.extend(records.into_iter().filter(|record| local_pending.contains(&record.id)));
                }
                change => self.on_store_change(change),
            }
        }
        Ok(confirmed)
    }

    // ─── Startup ────────────────────────────────────────────────

    /// Replace the store with the source's snapshot without publishing it.
    ///
    /// On failure the store keeps whatever it had (empty on first start).
    pub async fn initial_load(&mut self, source: &dyn SnapshotSource) -> Result<(), ReconcileError> {
        self.guard.set();
        let result = self.load_from(source).await;
        self.guard.clear();

        match &result {
            Ok(()) => log::info!(
                "Loaded {} events at {} from initial state",
                self.store.len(),
                self.store.timestamp()
            ),
            Err(e) => log::error!("Error fetching initial state: {e}"),
        }
        result
    }

    async fn load_from(&mut self, source: &dyn SnapshotSource) -> Result<(), ReconcileError> {
        let snapshot = source.fetch().await?;
        self.store.load(snapshot);
        self.gestures.clear_all();
        self.recompute_range();
        self.settle(&[]).await.map(|_| ())
    }

    /// Load the initial state, then process channel events and local edits
    /// one at a time until the channel closes or disconnects.
    pub async fn run(
        &mut self,
        source: &dyn SnapshotSource,
        mut inbound: mpsc::Receiver<ChannelEvent>,
        mut local: mpsc::Receiver<LocalChange>,
    ) {
        let _ = self.initial_load(source).await;

        let mut local_open = true;
        loop {
            tokio::select! {
                event = inbound.recv() => {
                    let Some(event) = event else {
                        log::info!("Channel closed, stopping engine");
                        break;
                    };
                    let disconnected = matches!(event, ChannelEvent::Disconnected);
                    self.on_channel_event(event).await;
                    if disconnected {
                        break;
                    }
                }

                change = local.recv(), if local_open => {
                    let Some(change) = change else {
                        local_open = false;
                        continue;
                    };
                    if let Err(e) = self.local_edit(change) {
                        log::warn!("Local edit refused: {e}");
                        continue;
                    }
                    if self.store.has_uncommitted() {
                        if let Err(e) = self.commit().await {
                            log::error!("Commit failed: {e}");
                        }
                    }
                }
            }
        }
    }

    /// React to one event from the channel client.
    pub async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Attached { connection_id, members } => {
                self.connection_id = Some(connection_id);
                self.roster.reset(members);
            }
            ChannelEvent::Message(message) => {
                if let Err(e) = self.handle_inbound(&message).await {
                    log::error!("Failed to apply {} ({}): {e}", message.name, message.id);
                }
            }
            ChannelEvent::Presence { action, member } => {
                log::debug!("{} {:?}", member.client_id, action);
                self.roster.apply(action, member);
            }
            ChannelEvent::Error(reason) => log::warn!("Channel error: {reason}"),
            ChannelEvent::Disconnected => {
                log::info!("Channel disconnected");
                self.roster.clear();
            }
        }
    }

    // ─── View ───────────────────────────────────────────────────

    fn recompute_range(&mut self) {
        let Some((start, end)) = self.store.time_span() else {
            return;
        };
        match self.axis.as_mut() {
            Some(axis) => axis.set_span(start, end),
            None => self.axis = Some(TimeAxis::new(start, end, self.config.view_width)),
        }
    }

    pub fn view(&self) -> EngineView {
        let mut gestures: Vec<_> = self.gestures.iter().map(|(id, g)| (id, g.clone())).collect();
        gestures.sort_by_key(|(id, _)| *id);
        EngineView {
            time_span: self.axis.map(|axis| (axis.start(), axis.end())),
            gestures,
            online: self.roster.names().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn guard(&self) -> EchoGuard {
        self.guard
    }

    pub fn gestures(&self) -> &GestureBoard {
        &self.gestures
    }

    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    pub fn time_axis(&self) -> Option<&TimeAxis> {
        self.axis.as_ref()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection_id
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Gesture payloads without a user name fall back to the publisher's client id.
fn origin_name(user_name: String, message: &WireMessage) -> String {
    if user_name.is_empty() {
        message.client_id.clone()
    } else {
        user_name
    }
}
