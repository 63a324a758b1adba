//! Behavioural properties of the store, codec and reconciliation engine.
//!
//! These run without a hub: the engine publishes into a recording
//! publisher and inbound messages are built by hand.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::{json, Value};
use uuid::Uuid;

use schedule_collab::codec;
use schedule_collab::{
    ChangeOperation, EngineConfig, FieldPatch, ImmediateCommit, InboundOutcome, LocalChange, Publisher,
    ReconciliationEngine, ScheduleStore, Snapshot, StoreChange, TransportError, WireMessage,
};

const SNAPSHOT_TS: u64 = 1_704_465_181_411;

#[derive(Clone, Default)]
struct Recorder {
    sent: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorder {
    fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Publisher for Recorder {
    fn publish(&self, name: &str, data: Value) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((name.to_string(), data));
        Ok(())
    }
}

fn inbound(name: &str, data: Value, timestamp: u64, connection_id: Uuid) -> WireMessage {
    WireMessage {
        id: Uuid::new_v4(),
        name: name.to_string(),
        data,
        client_id: "Henry".into(),
        connection_id,
        timestamp,
    }
}

async fn engine() -> (ReconciliationEngine<Recorder>, Recorder) {
    let recorder = Recorder::default();
    let config = EngineConfig {
        user_name: "Ivan".into(),
        ..EngineConfig::default()
    };
    let mut engine = ReconciliationEngine::new(config, recorder.clone(), ImmediateCommit);
    engine.initial_load(&Snapshot::demo()).await.unwrap();
    (engine, recorder)
}

fn add_nine() -> Value {
    json!({ "records": [{
        "id": 9, "resourceId": 2, "name": "Dentist",
        "startDate": "2019-02-07T10:00:00", "endDate": "2019-02-07T11:00:00"
    }] })
}

#[tokio::test]
async fn add_applied_twice_yields_one_record() {
    let mut engine = ReconciliationEngine::new(EngineConfig::default(), Recorder::default(), ImmediateCommit);
    let peer = Uuid::new_v4();

    engine.handle_inbound(&inbound("addEvent", add_nine(), 10, peer)).await.unwrap();
    let second = engine.handle_inbound(&inbound("addEvent", add_nine(), 11, peer)).await.unwrap();

    match second {
        InboundOutcome::Applied(report) => {
            assert_eq!(report.applied, 0);
            assert_eq!(report.conflicts.len(), 1);
        }
        other => panic!("expected applied outcome, got {other:?}"),
    }
    assert_eq!(engine.store().events().iter().filter(|e| e.id == 9).count(), 1);
}

#[tokio::test]
async fn watermark_drops_out_of_order_operation() {
    let mut engine = ReconciliationEngine::new(EngineConfig::default(), Recorder::default(), ImmediateCommit);
    let peer = Uuid::new_v4();
    engine.handle_inbound(&inbound("addEvent", add_nine(), 1, peer)).await.unwrap();

    let rename = |name: &str| json!({ "id": 9, "changes": { "name": name } });
    engine.handle_inbound(&inbound("updateEvent", rename("at 100"), 100, peer)).await.unwrap();
    let late = engine.handle_inbound(&inbound("updateEvent", rename("at 50"), 50, peer)).await.unwrap();
    assert_eq!(late, InboundOutcome::Stale);
    assert_eq!(engine.store().event(9).unwrap().name, "at 100");

    engine.handle_inbound(&inbound("updateEvent", rename("at 200"), 200, peer)).await.unwrap();
    assert_eq!(engine.store().timestamp(), 200);
    assert_eq!(engine.store().event(9).unwrap().name, "at 200");
}

#[tokio::test]
async fn local_update_fed_back_is_not_reapplied_or_republished() {
    let (mut engine, recorder) = engine().await;
    let own = Uuid::new_v4();
    engine.set_connection_id(Some(own));

    engine
        .local_edit(LocalChange::Update {
            id: 5,
            patch: FieldPatch::name("Sales pitch"),
        })
        .unwrap();
    let published = recorder.take();
    assert_eq!(published.len(), 1);
    let (name, data) = published[0].clone();

    // Echo tagged with our connection id
    let echo = inbound(&name, data.clone(), SNAPSHOT_TS + 1, own);
    match engine.handle_inbound(&echo).await.unwrap() {
        InboundOutcome::Applied(report) => assert!(report.is_noop()),
        other => panic!("expected applied outcome, got {other:?}"),
    }
    assert_eq!(engine.stats().echoes_applied, 1);

    // Same payload relayed under another id still publishes nothing
    let relayed = inbound(&name, data, SNAPSHOT_TS + 2, Uuid::new_v4());
    match engine.handle_inbound(&relayed).await.unwrap() {
        InboundOutcome::Applied(report) => assert!(report.is_noop()),
        other => panic!("expected applied outcome, got {other:?}"),
    }

    assert!(recorder.take().is_empty());
    assert_eq!(engine.store().event(5).unwrap().name, "Sales pitch");
}

#[test]
fn update_round_trip_changes_only_name() {
    let mut store = ScheduleStore::from_snapshot(Snapshot::demo());
    let before = store.event(3).unwrap().clone();

    let operation = ChangeOperation::UpdateEvent {
        id: 3,
        patch: FieldPatch::name("X"),
    };
    let decoded = codec::decode(operation.name(), &operation.to_payload()).unwrap();
    let ChangeOperation::UpdateEvent { id, patch } = decoded else {
        panic!("decoded into {decoded:?}");
    };
    store.apply_update(id, &patch, SNAPSHOT_TS + 1);

    let after = store.event(3).unwrap();
    assert_eq!(after.name, "X");
    assert_eq!(after.resource_id, before.resource_id);
    assert_eq!(after.start_date, before.start_date);
    assert_eq!(after.end_date, before.end_date);
    assert_eq!(after.duration_unit, before.duration_unit);
    assert_eq!(after.event_type, before.event_type);
    assert_eq!(after.icon_cls, before.icon_cls);
    assert_eq!(after.extra, before.extra);
}

#[tokio::test]
async fn update_date_string_becomes_timestamp() {
    let (mut engine, _) = engine().await;
    let msg = inbound(
        "updateEvent",
        json!({ "id": 3, "changes": { "startDate": "2019-02-07 09:00" } }),
        SNAPSHOT_TS + 1,
        Uuid::new_v4(),
    );
    engine.handle_inbound(&msg).await.unwrap();

    let expected = NaiveDate::from_ymd_opt(2019, 2, 7)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let event = engine.store().event(3).unwrap();
    assert_eq!(event.start_date, expected);
    assert!(!event.extra.contains_key("startDate"));
}

#[tokio::test]
async fn remove_then_stale_duplicate_is_noop() {
    let (mut engine, recorder) = engine().await;
    let peer = Uuid::new_v4();
    assert_eq!(engine.store().event(1).unwrap().resource_id, 1);

    let removed = engine
        .handle_inbound(&inbound("removeEvent", json!({ "records": [1] }), SNAPSHOT_TS + 5, peer))
        .await
        .unwrap();
    assert!(matches!(removed, InboundOutcome::Applied(ref r) if r.applied == 1));
    assert!(!engine.store().contains(1));
    assert_eq!(engine.store().timestamp(), SNAPSHOT_TS + 5);

    let before = engine.store().snapshot();
    for ts in [SNAPSHOT_TS + 5, SNAPSHOT_TS + 1] {
        let duplicate = inbound("removeEvent", json!({ "records": [1] }), ts, peer);
        assert_eq!(engine.handle_inbound(&duplicate).await.unwrap(), InboundOutcome::Stale);
    }
    assert_eq!(engine.store().snapshot(), before);
    assert!(recorder.take().is_empty());
}

#[test]
fn transient_add_is_not_encoded() {
    let mut store = ScheduleStore::new();
    let event = schedule_collab::Event::new(
        30,
        1,
        "Offsite",
        NaiveDate::from_ymd_opt(2019, 2, 7).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        NaiveDate::from_ymd_opt(2019, 2, 7).unwrap().and_hms_opt(17, 0, 0).unwrap(),
    );
    store.apply_add(vec![event], 1);

    let changes = store.commit().unwrap();
    let encoded: Vec<_> = changes.iter().filter_map(codec::encode).collect();
    assert!(matches!(changes[0], StoreChange::Add { .. }));
    assert_eq!(encoded.len(), 1);
    assert_eq!(encoded[0].name(), "addEvent");
}
