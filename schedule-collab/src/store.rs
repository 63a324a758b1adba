//! Shared state store: the canonical resources and events of one schedule.
//!
//! The store is a plain owned value with a single writer. Mutations are
//! idempotent against repeated input and report conflicts instead of failing.
//! Every mutation queues a [`StoreChange`] notification, which the owner
//! drains with [`ScheduleStore::take_changes`] or [`ScheduleStore::commit`].
//!
//! ```text
//! apply_add ──► records appended (uncommitted) ──► Add
//!                                    commit() ──► AddConfirmed
//! apply_update ─► fields patched ───────────────► Update { diffs }
//! apply_remove ─► records dropped ──────────────► Remove
//! ```

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use serde_json::Value;

use crate::codec::{FieldChange, FieldPatch};
use crate::error::{CommitError, ConflictError};
use crate::model::{Event, EventId, Resource, Snapshot};

/// One changed field: the new value and what it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub value: FieldChange,
    pub old_value: Value,
}

/// Change notification raised by a store mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// Records inserted but not yet confirmed by a commit.
    Add { records: Vec<Event> },
    /// Previously added records finalised by a commit.
    AddConfirmed { records: Vec<Event> },
    Update { id: EventId, diffs: Vec<FieldDiff> },
    Remove { ids: Vec<EventId> },
}

/// Outcome of one apply call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyReport {
    /// Records added, patched or removed.
    pub applied: usize,
    pub conflicts: Vec<ConflictError>,
}

impl ApplyReport {
    fn conflict(&mut self, conflict: ConflictError) {
        log::warn!("{conflict}");
        self.conflicts.push(conflict);
    }

    pub fn is_noop(&self) -> bool {
        self.applied == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleStore {
    resources: Vec<Resource>,
    events: Vec<Event>,
    timestamp: u64,
    /// Ids added since the last commit.
    uncommitted: Vec<EventId>,
    changes: VecDeque<StoreChange>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from a snapshot, already committed.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            resources: snapshot.data.resources,
            events: snapshot.data.events,
            timestamp: snapshot.timestamp,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.timestamp, self.resources.clone(), self.events.clone())
    }

    /// Last applied message timestamp (the watermark).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Whether an operation stamped `timestamp` is newer than everything applied.
    pub fn is_fresh(&self, timestamp: u64) -> bool {
        timestamp > self.timestamp
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.event(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Replace the whole schedule with a snapshot.
    ///
    /// Raises an `Add` for the incoming events so the loaded records go
    /// through the same confirmation path as any insert.
    pub fn load(&mut self, snapshot: Snapshot) {
        let removed: Vec<EventId> = self.events.iter().map(|event| event.id).collect();
        if !removed.is_empty() {
            self.changes.push_back(StoreChange::Remove { ids: removed });
        }

        self.resources = snapshot.data.resources;
        self.events = snapshot.data.events;
        self.timestamp = snapshot.timestamp;
        self.uncommitted = self.events.iter().map(|event| event.id).collect();

        if !self.events.is_empty() {
            self.changes.push_back(StoreChange::Add {
                records: self.events.clone(),
            });
        }
    }

    pub fn apply_add(&mut self, records: Vec<Event>, timestamp: u64) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut added = Vec::new();

        for record in records {
            if self.contains(record.id) || added.iter().any(|e: &Event| e.id == record.id) {
                report.conflict(ConflictError::DuplicateId(record.id));
                continue;
            }
            if !record.has_valid_range() {
                report.conflict(ConflictError::InvalidRange(record.id));
                continue;
            }
            added.push(record);
        }

        report.applied = added.len();
        if !added.is_empty() {
            self.uncommitted.extend(added.iter().map(|event| event.id));
            self.events.extend(added.iter().cloned());
            self.changes.push_back(StoreChange::Add { records: added });
        }
        self.advance(timestamp);
        report
    }

    /// Patch one event field by field.
    ///
    /// If the patched dates would put the end before the start, the date
    /// fields of this patch are dropped and the other fields still apply.
    pub fn apply_update(&mut self, id: EventId, patch: &FieldPatch, timestamp: u64) -> ApplyReport {
        let mut report = ApplyReport::default();
        self.advance(timestamp);

        let Some(index) = self.events.iter().position(|event| event.id == id) else {
            report.conflict(ConflictError::UnknownId(id));
            return report;
        };

        let mut candidate = self.events[index].clone();
        for change in &patch.changes {
            set_field(&mut candidate, change);
        }
        let keep_dates = candidate.has_valid_range();
        if !keep_dates {
            report.conflict(ConflictError::InvalidRange(id));
        }

        let event = &mut self.events[index];
        let mut diffs = Vec::new();
        for change in &patch.changes {
            if !keep_dates && change.is_date() {
                continue;
            }
            if let Some(old_value) = set_field(event, change) {
                diffs.push(FieldDiff {
                    value: change.clone(),
                    old_value,
                });
            }
        }

        if !diffs.is_empty() {
            report.applied = 1;
            self.changes.push_back(StoreChange::Update { id, diffs });
        }
        report
    }

    pub fn apply_remove(&mut self, ids: &[EventId], timestamp: u64) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut removed: Vec<EventId> = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.contains(id) && !removed.contains(&id) {
                removed.push(id);
            }
        }

        self.events.retain(|event| !removed.contains(&event.id));
        self.uncommitted.retain(|id| !removed.contains(id));
        report.applied = removed.len();

        if !removed.is_empty() {
            self.changes.push_back(StoreChange::Remove { ids: removed });
        }
        self.advance(timestamp);
        report
    }

    /// `min(startDate) .. max(endDate)` over all events.
    pub fn time_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.events.iter().map(|event| event.start_date).min()?;
        let end = self.events.iter().map(|event| event.end_date).max()?;
        Some((start, end))
    }

    /// Drain pending notifications without confirming adds.
    pub fn take_changes(&mut self) -> Vec<StoreChange> {
        self.changes.drain(..).collect()
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Ids added since the last commit, in insertion order.
    pub fn uncommitted(&self) -> &[EventId] {
        &self.uncommitted
    }

    /// Treat the matching uncommitted ids as final without raising
    /// `AddConfirmed`, and drop queued notifications.
    pub fn discard_pending(&mut self, settled: impl Fn(EventId) -> bool) {
        self.uncommitted.retain(|&id| !settled(id));
        self.changes.clear();
    }

    /// Confirm uncommitted records and drain all notifications.
    ///
    /// The `AddConfirmed` notification is queued last so it follows the
    /// `Add` it confirms.
    pub fn commit(&mut self) -> Result<Vec<StoreChange>, CommitError> {
        let pending = std::mem::take(&mut self.uncommitted);
        let mut confirmed = Vec::with_capacity(pending.len());
        for id in pending {
            match self.event(id) {
                Some(event) => confirmed.push(event.clone()),
                None => {
                    self.changes.clear();
                    return Err(CommitError::MissingRecord(id));
                }
            }
        }

        if !confirmed.is_empty() {
            self.changes.push_back(StoreChange::AddConfirmed { records: confirmed });
        }
        Ok(self.take_changes())
    }

    fn advance(&mut self, timestamp: u64) {
        if timestamp > self.timestamp {
            self.timestamp = timestamp;
        }
    }
}

/// Assign one field, returning the previous value if it changed.
fn set_field(event: &mut Event, change: &FieldChange) -> Option<Value> {
    fn replace<T: PartialEq>(slot: &mut T, value: T, old: impl FnOnce(&T) -> Value) -> Option<Value> {
        if *slot == value {
            return None;
        }
        let previous = old(slot);
        *slot = value;
        Some(previous)
    }

    match change {
        FieldChange::ResourceId(id) => replace(&mut event.resource_id, *id, |v| Value::from(*v)),
        FieldChange::Name(name) => replace(&mut event.name, name.clone(), |v| Value::from(v.as_str())),
        FieldChange::StartDate(date) => replace(&mut event.start_date, *date, |v| {
            Value::from(crate::model::format_wire_date(v))
        }),
        FieldChange::EndDate(date) => replace(&mut event.end_date, *date, |v| {
            Value::from(crate::model::format_wire_date(v))
        }),
        FieldChange::DurationUnit(unit) => replace(&mut event.duration_unit, *unit, |v| {
            serde_json::to_value(v).unwrap_or(Value::Null)
        }),
        FieldChange::EventType(kind) => replace(&mut event.event_type, kind.clone(), |v| {
            serde_json::to_value(v).unwrap_or(Value::Null)
        }),
        FieldChange::IconCls(icon) => replace(&mut event.icon_cls, icon.clone(), |v| Value::from(v.as_str())),
        FieldChange::Extra { key, value } => {
            let previous = event.extra.get(key).cloned().unwrap_or(Value::Null);
            if previous == *value {
                return None;
            }
            event.extra.insert(key.clone(), value.clone());
            Some(previous)
        }
    }
}
