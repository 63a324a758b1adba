//! Named topic fan-out with a short rewind history.
//!
//! Each topic owns one tokio broadcast channel, so subscribers receive
//! events in publish order. Published messages are stamped with a strictly
//! increasing millisecond timestamp and kept in a bounded history so a
//! peer that attaches (or re-attaches) can replay the last few seconds.
//!
//! ```text
//! publish ──► stamp ts ──► history (window + cap) ──► broadcast::Sender
//!                                                        │
//! attach(rewind) ──► backlog = history[ts ≥ now − rewind] + Receiver
//! ```
//!
//! Backlog and receiver are taken under the history lock, the same lock
//! publish holds while sending, so nothing published after the attach is
//! missed. A lagging receiver loses messages (reported, not retried).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Member, PresenceAction, WireMessage};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What a topic subscriber receives.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    Message(Arc<WireMessage>),
    Presence { action: PresenceAction, member: Member },
}

#[derive(Debug, Clone, Default)]
pub struct TopicStats {
    pub messages_published: u64,
    pub history_len: usize,
    pub active_members: usize,
}

/// Receiver plus the history replayed at attach time.
pub struct Subscription {
    pub backlog: Vec<Arc<WireMessage>>,
    pub receiver: broadcast::Receiver<TopicEvent>,
}

struct History {
    messages: VecDeque<Arc<WireMessage>>,
    last_timestamp: u64,
    window_ms: u64,
    max_len: usize,
}

impl History {
    fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_ms);
        while let Some(front) = self.messages.front() {
            if front.timestamp < cutoff || self.messages.len() > self.max_len {
                self.messages.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct Topic {
    name: String,
    sender: broadcast::Sender<TopicEvent>,
    history: Mutex<History>,
    members: RwLock<HashMap<Uuid, Member>>,
    capacity: usize,
    messages_published: AtomicU64,
}

impl Topic {
    /// `capacity` bounds both the per-subscriber buffer and the history length.
    pub fn new(name: impl Into<String>, capacity: usize, history_window: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            history: Mutex::new(History {
                messages: VecDeque::with_capacity(capacity.min(1024)),
                last_timestamp: 0,
                window_ms: history_window.as_millis() as u64,
                max_len: capacity.max(1),
            }),
            members: RwLock::new(HashMap::new()),
            capacity,
            messages_published: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn history(&self) -> MutexGuard<'_, History> {
        // A panic while holding the lock leaves the deque consistent.
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stamp, record and fan out a change published by `origin`.
    pub fn publish(&self, name: impl Into<String>, data: Value, origin: &Member) -> Arc<WireMessage> {
        self.publish_at(now_ms(), name.into(), data, origin)
    }

    pub(crate) fn publish_at(&self, now: u64, name: String, data: Value, origin: &Member) -> Arc<WireMessage> {
        let mut history = self.history();
        let timestamp = now.max(history.last_timestamp + 1);
        history.last_timestamp = timestamp;

        let message = Arc::new(WireMessage {
            id: Uuid::new_v4(),
            name,
            data,
            client_id: origin.client_id.clone(),
            connection_id: origin.connection_id,
            timestamp,
        });
        history.messages.push_back(message.clone());
        history.prune(now);

        let receivers = self.sender.send(TopicEvent::Message(message.clone())).unwrap_or(0);
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Topic {}: {} from {} at {} ({} receivers)",
            self.name,
            message.name,
            message.client_id,
            timestamp,
            receivers
        );
        message
    }

    /// Subscribe without joining the member list (hub-internal followers).
    pub fn subscribe(&self, rewind: Duration) -> Subscription {
        self.subscribe_at(now_ms(), rewind)
    }

    pub(crate) fn subscribe_at(&self, now: u64, rewind: Duration) -> Subscription {
        let history = self.history();
        let receiver = self.sender.subscribe();
        let cutoff = now.saturating_sub(rewind.as_millis() as u64);
        let backlog = history
            .messages
            .iter()
            .filter(|message| message.timestamp >= cutoff)
            .cloned()
            .collect();
        Subscription { backlog, receiver }
    }

    /// Join the topic as `member` and announce it to the other subscribers.
    pub async fn attach(&self, member: Member, rewind: Duration) -> Subscription {
        let subscription = self.subscribe(rewind);
        self.members.write().await.insert(member.connection_id, member.clone());
        let _ = self.sender.send(TopicEvent::Presence {
            action: PresenceAction::Enter,
            member,
        });
        subscription
    }

    pub async fn detach(&self, connection_id: &Uuid) -> Option<Member> {
        let member = self.members.write().await.remove(connection_id)?;
        let _ = self.sender.send(TopicEvent::Presence {
            action: PresenceAction::Leave,
            member: member.clone(),
        });
        Some(member)
    }

    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// Last timestamp handed out on this topic.
    pub fn last_timestamp(&self) -> u64 {
        self.history().last_timestamp
    }

    pub async fn stats(&self) -> TopicStats {
        let history_len = self.history().messages.len();
        TopicStats {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            history_len,
            active_members: self.member_count().await,
        }
    }
}

/// Maps topic names to topics.
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    capacity: usize,
    history_window: Duration,
}

impl TopicRegistry {
    pub fn new(capacity: usize, history_window: Duration) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
            history_window,
        }
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<Topic> {
        {
            let topics = self.topics.read().await;
            if let Some(topic) = topics.get(name) {
                return topic.clone();
            }
        }

        let mut topics = self.topics.write().await;
        // Double-check after acquiring the write lock
        if let Some(topic) = topics.get(name) {
            return topic.clone();
        }
        let topic = Arc::new(Topic::new(name, self.capacity, self.history_window));
        topics.insert(name.to_string(), topic.clone());
        log::info!("Topic {name} created");
        topic
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().await.get(name).cloned()
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    pub async fn topic_names(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn topic() -> Topic {
        Topic::new("scheduler", 16, Duration::from_secs(120))
    }

    #[tokio::test]
    async fn test_publish_fan_out_in_order() {
        let topic = topic();
        let alice = Member::new("Alice");
        let mut rx1 = topic.subscribe(Duration::ZERO).receiver;
        let mut rx2 = topic.subscribe(Duration::ZERO).receiver;

        topic.publish("updateEvent", json!({ "id": 1 }), &alice);
        topic.publish("removeEvent", json!({ "records": [1] }), &alice);

        for rx in [&mut rx1, &mut rx2] {
            let names: Vec<String> = [rx.recv().await.unwrap(), rx.recv().await.unwrap()]
                .into_iter()
                .map(|event| match event {
                    TopicEvent::Message(m) => m.name.clone(),
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            assert_eq!(names, vec!["updateEvent", "removeEvent"]);
        }
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let topic = topic();
        let bob = Member::new("Bob");
        let a = topic.publish_at(1_000, "updateEvent".into(), json!({}), &bob);
        let b = topic.publish_at(1_000, "updateEvent".into(), json!({}), &bob);
        let c = topic.publish_at(900, "updateEvent".into(), json!({}), &bob);

        assert_eq!(a.timestamp, 1_000);
        assert_eq!(b.timestamp, 1_001);
        assert_eq!(c.timestamp, 1_002);
        assert_eq!(topic.last_timestamp(), 1_002);
        assert_eq!(c.client_id, "Bob");
        assert_eq!(c.connection_id, bob.connection_id);
    }

    #[test]
    fn test_backlog_respects_rewind_window() {
        let topic = topic();
        let bob = Member::new("Bob");
        topic.publish_at(10_000, "updateEvent".into(), json!({ "n": 1 }), &bob);
        topic.publish_at(14_000, "updateEvent".into(), json!({ "n": 2 }), &bob);
        topic.publish_at(16_000, "updateEvent".into(), json!({ "n": 3 }), &bob);

        let subscription = topic.subscribe_at(20_000, Duration::from_secs(5));
        let replayed: Vec<i64> = subscription
            .backlog
            .iter()
            .map(|m| m.data["n"].as_i64().unwrap())
            .collect();
        assert_eq!(replayed, vec![3]);

        let none = topic.subscribe_at(20_000, Duration::ZERO);
        assert!(none.backlog.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let topic = Topic::new("scheduler", 4, Duration::from_secs(3600));
        let bob = Member::new("Bob");
        for n in 0..10 {
            topic.publish_at(1_000 + n, "updateEvent".into(), json!({ "n": n }), &bob);
        }
        let backlog = topic.subscribe_at(1_010, Duration::from_secs(3600)).backlog;
        assert_eq!(backlog.len(), 4);
        assert_eq!(backlog[0].data["n"], 6);
    }

    #[tokio::test]
    async fn test_attach_announces_presence() {
        let topic = topic();
        let mut watcher = topic.subscribe(Duration::ZERO).receiver;
        let zoe = Member::new("Zoe");

        let _sub = topic.attach(zoe.clone(), Duration::ZERO).await;
        assert_eq!(topic.member_count().await, 1);
        match watcher.recv().await.unwrap() {
            TopicEvent::Presence { action, member } => {
                assert_eq!(action, PresenceAction::Enter);
                assert_eq!(member, zoe);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(topic.detach(&zoe.connection_id).await, Some(zoe.clone()));
        assert!(topic.detach(&zoe.connection_id).await.is_none());
        assert_eq!(topic.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let topic = topic();
        let bob = Member::new("Bob");
        topic.publish("updateEvent", json!({}), &bob);
        topic.publish("updateEvent", json!({}), &bob);

        let stats = topic.stats().await;
        assert_eq!(stats.messages_published, 2);
        assert_eq!(stats.history_len, 2);
        assert_eq!(stats.active_members, 0);
    }

    #[tokio::test]
    async fn test_registry_get_or_create() {
        let registry = TopicRegistry::new(16, Duration::from_secs(60));
        let a = registry.get_or_create("scheduler").await;
        let b = registry.get_or_create("scheduler").await;
        let _other = registry.get_or_create("other").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.topic_count().await, 2);
        assert!(registry.get("missing").await.is_none());
        assert!(registry.topic_names().await.contains(&"other".to_string()));
    }
}
