//! Schedule data model: resources, events and snapshots.
//!
//! Dates live in memory as [`NaiveDateTime`] and travel as strings.
//! [`parse_wire_date`] accepts the forms the scheduling widget emits:
//!
//! ```text
//! 2019-02-07 09:00
//! 2019-02-07 09:00:00
//! 2019-02-07T09:00:00.000
//! 2019-02-07T09:00:00.000Z      (offset forms are normalised to UTC)
//! ```

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::DecodeError;

pub type ResourceId = i64;
pub type EventId = i64;

/// Wire output format for dates.
pub const WIRE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a transmitted date string into a timestamp value.
pub fn parse_wire_date(raw: &str) -> Result<NaiveDateTime, DecodeError> {
    let raw = raw.trim();
    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(date);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.naive_utc())
        .map_err(|_| DecodeError::InvalidDate(raw.to_string()))
}

pub fn format_wire_date(date: &NaiveDateTime) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

/// Serde adapter for wire dates, used by [`Event`].
pub mod wire_date {
    use super::*;

    pub fn serialize<S: Serializer>(date: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_wire_date(date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse_wire_date(&raw).map_err(serde::de::Error::custom)
    }
}

/// A schedulable row (a person, a room).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub event_color: String,
}

impl Resource {
    pub fn new(
        id: ResourceId,
        name: impl Into<String>,
        kind: impl Into<String>,
        event_color: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            event_color: event_color.into(),
        }
    }
}

/// Unit the widget uses to express an event's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DurationUnit {
    #[serde(rename = "ms", alias = "millisecond")]
    Millisecond,
    #[serde(rename = "s", alias = "second")]
    Second,
    #[serde(rename = "mi", alias = "minute")]
    Minute,
    #[default]
    #[serde(rename = "h", alias = "hour")]
    Hour,
    #[serde(rename = "d", alias = "day")]
    Day,
    #[serde(rename = "w", alias = "week")]
    Week,
    #[serde(rename = "M", alias = "month")]
    Month,
    #[serde(rename = "q", alias = "quarter")]
    Quarter,
    #[serde(rename = "y", alias = "year")]
    Year,
}

/// Widget event type. Values other than the two built-in ones are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Meeting,
    #[default]
    Appointment,
    Other(String),
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Meeting" => EventType::Meeting,
            "Appointment" => EventType::Appointment,
            _ => EventType::Other(value),
        }
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::Meeting => "Meeting".to_string(),
            EventType::Appointment => "Appointment".to_string(),
            EventType::Other(value) => value,
        }
    }
}

/// A scheduled item bound to one resource.
///
/// Widget fields the model does not know about are carried in `extra`
/// so that field-level patches never lose them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub resource_id: ResourceId,
    pub name: String,
    #[serde(with = "wire_date")]
    pub start_date: NaiveDateTime,
    #[serde(with = "wire_date")]
    pub end_date: NaiveDateTime,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub icon_cls: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn new(
        id: EventId,
        resource_id: ResourceId,
        name: impl Into<String>,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
    ) -> Self {
        Self {
            id,
            resource_id,
            name: name.into(),
            start_date,
            end_date,
            duration_unit: DurationUnit::Hour,
            event_type: EventType::Appointment,
            icon_cls: String::new(),
            extra: Map::new(),
        }
    }

    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_icon(mut self, icon_cls: impl Into<String>) -> Self {
        self.icon_cls = icon_cls.into();
        self
    }

    /// `startDate ≤ endDate`.
    pub fn has_valid_range(&self) -> bool {
        self.start_date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScheduleData {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Point-in-time copy of the shared schedule, as served by `GET /api/state`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: u64,
    pub data: ScheduleData,
}

impl Snapshot {
    pub fn new(timestamp: u64, resources: Vec<Resource>, events: Vec<Event>) -> Self {
        Self {
            timestamp,
            data: ScheduleData { resources, events },
        }
    }

    /// The schedule the hub starts from when no seed file is configured.
    pub fn demo() -> Self {
        let resources = vec![
            Resource::new(1, "Rob", "Sales", "red"),
            Resource::new(2, "Mike", "Sales", "orange"),
            Resource::new(3, "Kate", "Sales", "green"),
            Resource::new(4, "Lisa", "Developer", "blue"),
            Resource::new(5, "Dave", "Developer", "teal"),
            Resource::new(6, "Arnold", "Developer", "lime"),
            Resource::new(7, "Lee", "Marketing", "purple"),
            Resource::new(8, "Jong", "Marketing", "cyan"),
        ];

        use EventType::{Appointment, Meeting};
        let rows: [(EventId, ResourceId, &str, (u32, u32), (u32, u32), EventType, &str); 14] = [
            (1, 1, "Important Meeting", (9, 0), (10, 30), Meeting, "b-fa b-fa-exclamation-circle"),
            (2, 2, "Team Meeting", (10, 0), (11, 30), Meeting, "b-fa b-fa-calendar"),
            (3, 3, "Take cat to vet", (11, 0), (12, 30), Appointment, "b-fa b-fa-cat"),
            (4, 4, "Launch", (12, 0), (13, 30), Appointment, "b-fa b-fa-info"),
            (5, 5, "Sales demo", (13, 0), (14, 30), Appointment, "b-fa b-fa-clock"),
            (6, 6, "Daily Scrum", (14, 0), (15, 30), Meeting, "b-fa b-fa-calendar"),
            (7, 7, "Sales Forecast Meeting", (15, 0), (16, 30), Meeting, "b-fa b-fa-calendar"),
            (8, 8, "Get car repaired", (16, 0), (17, 30), Appointment, "b-fa b-fa-car"),
            (9, 8, "Dentist Appointment", (10, 0), (11, 0), Appointment, "b-fa b-fa-clock"),
            (10, 6, "Presentation", (10, 0), (12, 0), Appointment, "b-fa b-fa-video"),
            (11, 7, "Customer Meeting", (10, 0), (11, 30), Meeting, "b-fa b-fa-calendar-alt"),
            (12, 3, "Visit cafe", (14, 0), (16, 0), Appointment, "b-fa b-fa-mug-hot"),
            (13, 2, "Movie", (14, 30), (16, 0), Appointment, "b-fa b-fa-film"),
            (14, 1, "Meet train", (15, 0), (16, 0), Appointment, "b-fa b-fa-train"),
        ];

        let day = chrono::NaiveDate::from_ymd_opt(2019, 2, 7).unwrap_or_default();
        let at = |(h, m): (u32, u32)| day.and_hms_opt(h, m, 0).unwrap_or_default();
        let events = rows
            .into_iter()
            .map(|(id, resource_id, name, start, end, event_type, icon)| {
                Event::new(id, resource_id, name, at(start), at(end))
                    .with_type(event_type)
                    .with_icon(icon)
            })
            .collect();

        Self::new(1_704_465_181_411, resources, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 2, 7).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_widget_date_forms() {
        assert_eq!(parse_wire_date("2019-02-07 09:00").unwrap(), date(9, 0));
        assert_eq!(parse_wire_date("2019-02-07 09:00:00").unwrap(), date(9, 0));
        assert_eq!(parse_wire_date("2019-02-07T09:00:00.000").unwrap(), date(9, 0));
        assert_eq!(parse_wire_date("2019-02-07T09:00:00.000Z").unwrap(), date(9, 0));
        assert_eq!(parse_wire_date("2019-02-07T10:00:00+01:00").unwrap(), date(9, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_wire_date("next tuesday"),
            Err(DecodeError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::new(1, 1, "Important Meeting", date(9, 0), date(10, 30))
            .with_type(EventType::Meeting)
            .with_icon("b-fa b-fa-calendar");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["resourceId"], 1);
        assert_eq!(json["startDate"], "2019-02-07T09:00:00");
        assert_eq!(json["durationUnit"], "h");
        assert_eq!(json["eventType"], "Meeting");
        assert_eq!(json["iconCls"], "b-fa b-fa-calendar");
    }

    #[test]
    fn test_event_keeps_unknown_fields() {
        let json = serde_json::json!({
            "id": 20,
            "resourceId": 3,
            "name": "Lunch",
            "startDate": "2019-02-07 12:00",
            "endDate": "2019-02-07 13:00",
            "durationUnit": "hour",
            "eventType": "Break",
            "percentDone": 40
        });
        let event: Event = serde_json::from_value(json).unwrap();

        assert_eq!(event.duration_unit, DurationUnit::Hour);
        assert_eq!(event.event_type, EventType::Other("Break".into()));
        assert_eq!(event.extra.get("percentDone"), Some(&Value::from(40)));
        assert!(event.icon_cls.is_empty());

        let served = serde_json::to_value(&event).unwrap();
        assert_eq!(served["eventType"], "Break");
    }

    #[test]
    fn test_resource_type_field() {
        let resource: Resource = serde_json::from_value(serde_json::json!({
            "id": 4, "name": "Lisa", "type": "Developer", "eventColor": "blue"
        }))
        .unwrap();
        assert_eq!(resource.kind, "Developer");
        assert_eq!(resource.event_color, "blue");
    }

    #[test]
    fn test_demo_snapshot() {
        let snapshot = Snapshot::demo();
        assert_eq!(snapshot.timestamp, 1_704_465_181_411);
        assert_eq!(snapshot.data.resources.len(), 8);
        assert_eq!(snapshot.data.events.len(), 14);
        assert!(snapshot.data.events.iter().all(Event::has_valid_range));
        assert_eq!(snapshot.data.events[8].name, "Dentist Appointment");
        assert_eq!(snapshot.data.events[8].resource_id, 8);
    }
}
