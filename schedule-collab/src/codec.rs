//! Change codec: store notifications ⇄ change operations ⇄ wire payloads.
//!
//! Wire payloads are JSON objects published under a command name:
//!
//! ```text
//! updateEvent  { id, changes: { field: value, … } }   diff fields only
//! addEvent     { records: [ Event, … ] }               confirmed inserts only
//! removeEvent  { records: [ id, … ] }                  ids only
//! dragEvent    { id, userName }
//! resizeEvent  { id, userName, edge, startDate, endDate }
//! ```
//!
//! Decoding is exhaustive over [`Command`]. `updateEvent` is decoded field
//! by field: a bad field lands in [`FieldPatch::rejected`] and the rest of
//! the patch still applies.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::DecodeError;
use crate::model::{format_wire_date, parse_wire_date, DurationUnit, Event, EventId, EventType, ResourceId};
use crate::store::StoreChange;

/// Suffix marking a field whose wire value is a date string.
pub const DATE_SUFFIX: &str = "Date";

/// Command discriminator carried as the wire message name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    AddEvent,
    UpdateEvent,
    RemoveEvent,
    DragEvent,
    ResizeEvent,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::AddEvent,
        Command::UpdateEvent,
        Command::RemoveEvent,
        Command::DragEvent,
        Command::ResizeEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::AddEvent => "addEvent",
            Command::UpdateEvent => "updateEvent",
            Command::RemoveEvent => "removeEvent",
            Command::DragEvent => "dragEvent",
            Command::ResizeEvent => "resizeEvent",
        }
    }

    /// Commands that mutate the shared store (as opposed to live gestures).
    pub fn is_mutation(&self) -> bool {
        matches!(self, Command::AddEvent | Command::UpdateEvent | Command::RemoveEvent)
    }
}

impl FromStr for Command {
    type Err = DecodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.as_str() == name)
            .ok_or_else(|| DecodeError::UnknownCommand(name.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edge of an event a resize gesture is dragging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeEdge {
    Start,
    End,
}

impl ResizeEdge {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeEdge::Start => "start",
            ResizeEdge::End => "end",
        }
    }
}

/// One typed field assignment of an update patch.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    ResourceId(ResourceId),
    Name(String),
    StartDate(NaiveDateTime),
    EndDate(NaiveDateTime),
    DurationUnit(DurationUnit),
    EventType(EventType),
    IconCls(String),
    /// Any other widget field. Date-suffixed keys hold a normalised wire date.
    Extra { key: String, value: Value },
}

impl FieldChange {
    pub fn key(&self) -> &str {
        match self {
            FieldChange::ResourceId(_) => "resourceId",
            FieldChange::Name(_) => "name",
            FieldChange::StartDate(_) => "startDate",
            FieldChange::EndDate(_) => "endDate",
            FieldChange::DurationUnit(_) => "durationUnit",
            FieldChange::EventType(_) => "eventType",
            FieldChange::IconCls(_) => "iconCls",
            FieldChange::Extra { key, .. } => key,
        }
    }

    pub fn is_date(&self) -> bool {
        self.key().ends_with(DATE_SUFFIX)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldChange::ResourceId(id) => Value::from(*id),
            FieldChange::Name(name) => Value::from(name.as_str()),
            FieldChange::StartDate(date) | FieldChange::EndDate(date) => {
                Value::from(format_wire_date(date))
            }
            FieldChange::DurationUnit(unit) => serde_json::to_value(unit).unwrap_or(Value::Null),
            FieldChange::EventType(kind) => serde_json::to_value(kind).unwrap_or(Value::Null),
            FieldChange::IconCls(icon) => Value::from(icon.as_str()),
            FieldChange::Extra { value, .. } => value.clone(),
        }
    }

    /// Decode one `changes` entry. Date-suffixed keys must carry a parsable string.
    pub fn decode(key: &str, value: &Value) -> Result<Self, DecodeError> {
        let invalid = |reason: &str| DecodeError::InvalidField {
            field: key.to_string(),
            reason: reason.to_string(),
        };

        if key.ends_with(DATE_SUFFIX) {
            let raw = value.as_str().ok_or_else(|| invalid("expected a date string"))?;
            let date = parse_wire_date(raw)?;
            return Ok(match key {
                "startDate" => FieldChange::StartDate(date),
                "endDate" => FieldChange::EndDate(date),
                _ => FieldChange::Extra {
                    key: key.to_string(),
                    value: Value::from(format_wire_date(&date)),
                },
            });
        }

        match key {
            "resourceId" => value
                .as_i64()
                .map(FieldChange::ResourceId)
                .ok_or_else(|| invalid("expected an integer id")),
            "name" => value
                .as_str()
                .map(|s| FieldChange::Name(s.to_string()))
                .ok_or_else(|| invalid("expected a string")),
            "iconCls" => value
                .as_str()
                .map(|s| FieldChange::IconCls(s.to_string()))
                .ok_or_else(|| invalid("expected a string")),
            "durationUnit" => DurationUnit::deserialize(value)
                .map(FieldChange::DurationUnit)
                .map_err(|e| invalid(&e.to_string())),
            "eventType" => EventType::deserialize(value)
                .map(FieldChange::EventType)
                .map_err(|e| invalid(&e.to_string())),
            _ => Ok(FieldChange::Extra {
                key: key.to_string(),
                value: value.clone(),
            }),
        }
    }
}

/// Field-level patch for `updateEvent`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldPatch {
    pub changes: Vec<FieldChange>,
    /// Fields that failed to decode and were left out.
    pub rejected: Vec<(String, DecodeError)>,
}

impl FieldPatch {
    pub fn new(changes: Vec<FieldChange>) -> Self {
        Self {
            changes,
            rejected: Vec::new(),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::new(vec![FieldChange::Name(name.into())])
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|change| change.key() == key)
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .changes
            .iter()
            .map(|change| (change.key().to_string(), change.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Decode a `changes` object. Never fails as a whole.
    pub fn decode(changes: Option<&Value>) -> Self {
        let mut patch = FieldPatch::default();
        let Some(Value::Object(map)) = changes else {
            if changes.is_some_and(|c| !c.is_null()) {
                patch.rejected.push((
                    "changes".to_string(),
                    DecodeError::Malformed("changes is not an object".to_string()),
                ));
            }
            return patch;
        };

        for (key, value) in map {
            if key == "id" {
                continue;
            }
            match FieldChange::decode(key, value) {
                Ok(change) => patch.changes.push(change),
                Err(e) => patch.rejected.push((key.clone(), e)),
            }
        }
        patch
    }
}

/// One mutation or gesture in transit between codec and channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOperation {
    AddEvent {
        records: Vec<Event>,
    },
    UpdateEvent {
        id: EventId,
        patch: FieldPatch,
    },
    RemoveEvent {
        ids: Vec<EventId>,
    },
    DragEvent {
        id: EventId,
        user_name: String,
    },
    ResizeEvent {
        id: EventId,
        user_name: String,
        edge: ResizeEdge,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
    },
}

impl ChangeOperation {
    pub fn command(&self) -> Command {
        match self {
            ChangeOperation::AddEvent { .. } => Command::AddEvent,
            ChangeOperation::UpdateEvent { .. } => Command::UpdateEvent,
            ChangeOperation::RemoveEvent { .. } => Command::RemoveEvent,
            ChangeOperation::DragEvent { .. } => Command::DragEvent,
            ChangeOperation::ResizeEvent { .. } => Command::ResizeEvent,
        }
    }

    pub fn name(&self) -> &'static str {
        self.command().as_str()
    }

    /// Single record the operation targets, if any.
    pub fn target(&self) -> Option<EventId> {
        match self {
            ChangeOperation::UpdateEvent { id, .. }
            | ChangeOperation::DragEvent { id, .. }
            | ChangeOperation::ResizeEvent { id, .. } => Some(*id),
            ChangeOperation::AddEvent { .. } | ChangeOperation::RemoveEvent { .. } => None,
        }
    }

    pub fn to_payload(&self) -> Value {
        match self {
            ChangeOperation::AddEvent { records } => json!({ "records": records }),
            ChangeOperation::UpdateEvent { id, patch } => json!({
                "id": id,
                "changes": patch.to_json(),
            }),
            ChangeOperation::RemoveEvent { ids } => json!({ "records": ids }),
            ChangeOperation::DragEvent { id, user_name } => json!({
                "id": id,
                "userName": user_name,
            }),
            ChangeOperation::ResizeEvent {
                id,
                user_name,
                edge,
                start_date,
                end_date,
            } => json!({
                "id": id,
                "userName": user_name,
                "edge": edge.as_str(),
                "startDate": format_wire_date(start_date),
                "endDate": format_wire_date(end_date),
            }),
        }
    }
}

/// Encode a store change notification for publishing.
///
/// Transient adds are not published; only [`StoreChange::AddConfirmed`] is.
pub fn encode(change: &StoreChange) -> Option<ChangeOperation> {
    match change {
        StoreChange::Update { id, diffs } if !diffs.is_empty() => Some(ChangeOperation::UpdateEvent {
            id: *id,
            patch: FieldPatch::new(diffs.iter().map(|diff| diff.value.clone()).collect()),
        }),
        StoreChange::Remove { ids } if !ids.is_empty() => {
            Some(ChangeOperation::RemoveEvent { ids: ids.clone() })
        }
        StoreChange::AddConfirmed { records } if !records.is_empty() => {
            Some(ChangeOperation::AddEvent {
                records: records.clone(),
            })
        }
        _ => None,
    }
}

/// Decode a received payload into a change operation.
pub fn decode(name: &str, data: &Value) -> Result<ChangeOperation, DecodeError> {
    let command: Command = name.parse()?;
    match command {
        Command::UpdateEvent => Ok(ChangeOperation::UpdateEvent {
            id: require_id(data)?,
            patch: FieldPatch::decode(data.get("changes")),
        }),
        Command::AddEvent => {
            let records = records_of(data)?
                .iter()
                .filter_map(|raw| match Event::deserialize(raw) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        log::warn!("Skipping malformed addEvent record: {e}");
                        None
                    }
                })
                .collect();
            Ok(ChangeOperation::AddEvent { records })
        }
        Command::RemoveEvent => {
            let ids = records_of(data)?
                .iter()
                .filter_map(|raw| {
                    let id = raw.as_i64();
                    if id.is_none() {
                        log::warn!("Skipping non-integer removeEvent id: {raw}");
                    }
                    id
                })
                .collect();
            Ok(ChangeOperation::RemoveEvent { ids })
        }
        Command::DragEvent => Ok(ChangeOperation::DragEvent {
            id: require_id(data)?,
            user_name: user_name_of(data),
        }),
        Command::ResizeEvent => Ok(ChangeOperation::ResizeEvent {
            id: require_id(data)?,
            user_name: user_name_of(data),
            edge: data
                .get("edge")
                .map(|edge| {
                    ResizeEdge::deserialize(edge).map_err(|e| DecodeError::InvalidField {
                        field: "edge".to_string(),
                        reason: e.to_string(),
                    })
                })
                .transpose()?
                .ok_or(DecodeError::MissingField("edge"))?,
            start_date: require_date(data, "startDate")?,
            end_date: require_date(data, "endDate")?,
        }),
    }
}

fn require_id(data: &Value) -> Result<EventId, DecodeError> {
    data.get("id")
        .and_then(Value::as_i64)
        .ok_or(DecodeError::MissingField("id"))
}

fn records_of(data: &Value) -> Result<&Vec<Value>, DecodeError> {
    data.get("records")
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingField("records"))
}

fn user_name_of(data: &Value) -> String {
    data.get("userName")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn require_date(data: &Value, field: &'static str) -> Result<NaiveDateTime, DecodeError> {
    let raw = data
        .get(field)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField(field))?;
    parse_wire_date(raw)
}
