use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;
use uuid::Uuid;

use schedule_collab::codec;
use schedule_collab::{
    ChangeOperation, EngineConfig, FieldPatch, Frame, ImmediateCommit, Member, Publisher, ReconciliationEngine,
    ScheduleStore, Snapshot, Topic, TransportError, WireMessage,
};

struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _name: &str, _data: serde_json::Value) -> Result<(), TransportError> {
        Ok(())
    }
}

fn bench_update_decode(c: &mut Criterion) {
    let data = json!({
        "id": 3,
        "changes": {
            "name": "Take cat to vet",
            "startDate": "2019-02-07T11:00:00",
            "endDate": "2019-02-07 12:30",
            "iconCls": "b-fa b-fa-cat",
            "percentDone": 40
        }
    });

    c.bench_function("update_decode", |b| {
        b.iter(|| black_box(codec::decode(black_box("updateEvent"), black_box(&data)).unwrap()))
    });
}

fn bench_update_encode(c: &mut Criterion) {
    let operation = ChangeOperation::UpdateEvent {
        id: 3,
        patch: FieldPatch::name("X"),
    };

    c.bench_function("update_encode", |b| {
        b.iter(|| black_box(black_box(&operation).to_payload()))
    });
}

fn bench_frame_roundtrip(c: &mut Criterion) {
    let frame = Frame::Message(WireMessage {
        id: Uuid::new_v4(),
        name: "updateEvent".into(),
        data: json!({ "id": 3, "changes": { "name": "X" } }),
        client_id: "Zoe".into(),
        connection_id: Uuid::new_v4(),
        timestamp: 1_704_465_181_412,
    });

    c.bench_function("frame_roundtrip", |b| {
        b.iter(|| {
            let text = frame.encode().unwrap();
            black_box(Frame::decode(&text).unwrap());
        })
    });
}

fn bench_store_update(c: &mut Criterion) {
    let patch = FieldPatch::name("Renamed");

    c.bench_function("store_apply_update", |b| {
        let mut store = ScheduleStore::from_snapshot(Snapshot::demo());
        let mut ts = store.timestamp();
        b.iter(|| {
            ts += 1;
            black_box(store.apply_update(7, &patch, ts));
            store.take_changes();
        })
    });
}

fn bench_topic_publish_100_subscribers(c: &mut Criterion) {
    let topic = Topic::new("scheduler", 4096, Duration::from_secs(5));
    let origin = Member::new("Bench");
    let _receivers: Vec<_> = (0..100).map(|_| topic.subscribe(Duration::ZERO).receiver).collect();
    let data = json!({ "records": [1] });

    c.bench_function("topic_publish_100_subscribers", |b| {
        b.iter(|| black_box(topic.publish("removeEvent", data.clone(), &origin)))
    });
}

fn bench_engine_inbound(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut engine = ReconciliationEngine::new(EngineConfig::default(), NullPublisher, ImmediateCommit);
    rt.block_on(engine.initial_load(&Snapshot::demo())).unwrap();
    let peer = Uuid::new_v4();
    let mut ts = engine.store().timestamp();
    let names = ["Alpha", "Beta"];

    c.bench_function("engine_handle_inbound_update", |b| {
        b.iter(|| {
            ts += 1;
            let message = WireMessage {
                id: Uuid::new_v4(),
                name: "updateEvent".into(),
                data: json!({ "id": 5, "changes": { "name": names[(ts % 2) as usize] } }),
                client_id: "Remote".into(),
                connection_id: peer,
                timestamp: ts,
            };
            black_box(rt.block_on(engine.handle_inbound(&message)).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_update_decode,
    bench_update_encode,
    bench_frame_roundtrip,
    bench_store_update,
    bench_topic_publish_100_subscribers,
    bench_engine_inbound,
);
criterion_main!(benches);
