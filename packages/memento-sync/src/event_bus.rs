//! Event Bus (C10, §5): typed pub/sub that the Sync Coordinator publishes onto
//! after every committed write, and that external consumers subscribe to for
//! live updates.
//!
//! One `broadcast` channel per event variant rather than one channel carrying an
//! enum — a subscriber interested only in `fileChange` never pays for decoding
//! `entityCreated` traffic, and a slow subscriber on one topic cannot starve the
//! others. Each topic remembers its last-published event for late subscribers
//! (`syncStatus` in particular needs a just-subscribed consumer to see the
//! current status immediately rather than wait for the next transition).

use chrono::{DateTime, Utc};
use memento_storage::domain::{Entity, Relationship};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Wraps a `broadcast::Receiver`, counting frames this subscriber missed
/// because it fell more than [`CHANNEL_CAPACITY`] messages behind (tokio's
/// broadcast channel drops the oldest on overflow rather than blocking the
/// publisher).
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
    dropped: Arc<AtomicU64>,
    /// The topic's last-published event, delivered once before any live
    /// traffic (§4.10 recency replay), then cleared.
    replay: Option<T>,
}

impl<T: Clone> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity: Entity,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDeletedEvent {
    pub entity_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEvent {
    pub relationship: Relationship,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDeletedEvent {
    pub relationship_id: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub path: String,
    pub change_type: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatusKind {
    Idle,
    Syncing,
    Paused,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusEvent {
    pub status: SyncStatusKind,
    pub pending_jobs: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownEvent {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Per-subscriber, per-topic dropped-frame counters, exposed so a caller can
/// tell a slow consumer apart from a silent one.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub entity_created_dropped: u64,
    pub entity_updated_dropped: u64,
    pub entity_deleted_dropped: u64,
    pub relationship_created_dropped: u64,
    pub relationship_deleted_dropped: u64,
    pub file_change_dropped: u64,
    pub sync_status_dropped: u64,
    pub shutdown_dropped: u64,
}

struct Topic<T> {
    sender: broadcast::Sender<T>,
    last: Mutex<Option<T>>,
    dropped: Arc<AtomicU64>,
}

impl<T: Clone> Topic<T> {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, last: Mutex::new(None), dropped: Arc::new(AtomicU64::new(0)) }
    }

    fn publish(&self, event: T) {
        *self.last.lock() = Some(event.clone());
        // No subscribers is not an error; the event is still remembered for
        // whoever subscribes next.
        let _ = self.sender.send(event);
    }

    /// New subscribers receive the topic's last-published event (if any)
    /// before anything live (§4.10 recency replay).
    fn subscribe(&self) -> Subscription<T> {
        Subscription { receiver: self.sender.subscribe(), dropped: self.dropped.clone(), replay: self.last() }
    }

    fn last(&self) -> Option<T> {
        self.last.lock().clone()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The Event Bus: one topic per variant named in §5.
pub struct EventBus {
    entity_created: Topic<EntityEvent>,
    entity_updated: Topic<EntityEvent>,
    entity_deleted: Topic<EntityDeletedEvent>,
    relationship_created: Topic<RelationshipEvent>,
    relationship_deleted: Topic<RelationshipDeletedEvent>,
    file_change: Topic<FileChangeEvent>,
    sync_status: Topic<SyncStatusEvent>,
    shutdown: Topic<ShutdownEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            entity_created: Topic::new(),
            entity_updated: Topic::new(),
            entity_deleted: Topic::new(),
            relationship_created: Topic::new(),
            relationship_deleted: Topic::new(),
            file_change: Topic::new(),
            sync_status: Topic::new(),
            shutdown: Topic::new(),
        }
    }

    pub fn publish_entity_created(&self, entity: Entity) {
        self.entity_created.publish(EntityEvent { entity, at: Utc::now() });
    }

    pub fn publish_entity_updated(&self, entity: Entity) {
        self.entity_updated.publish(EntityEvent { entity, at: Utc::now() });
    }

    pub fn publish_entity_deleted(&self, entity_id: impl Into<String>) {
        self.entity_deleted.publish(EntityDeletedEvent { entity_id: entity_id.into(), at: Utc::now() });
    }

    pub fn publish_relationship_created(&self, relationship: Relationship) {
        self.relationship_created.publish(RelationshipEvent { relationship, at: Utc::now() });
    }

    pub fn publish_relationship_deleted(&self, relationship_id: impl Into<String>) {
        self.relationship_deleted.publish(RelationshipDeletedEvent { relationship_id: relationship_id.into(), at: Utc::now() });
    }

    pub fn publish_file_change(&self, path: impl Into<String>, change_type: impl Into<String>) {
        self.file_change.publish(FileChangeEvent { path: path.into(), change_type: change_type.into(), at: Utc::now() });
    }

    pub fn publish_sync_status(&self, status: SyncStatusKind, pending_jobs: usize) {
        self.sync_status.publish(SyncStatusEvent { status, pending_jobs, at: Utc::now() });
    }

    pub fn publish_shutdown(&self, reason: impl Into<String>) {
        self.shutdown.publish(ShutdownEvent { reason: reason.into(), at: Utc::now() });
    }

    pub fn subscribe_entity_created(&self) -> Subscription<EntityEvent> {
        self.entity_created.subscribe()
    }

    pub fn subscribe_entity_updated(&self) -> Subscription<EntityEvent> {
        self.entity_updated.subscribe()
    }

    pub fn subscribe_entity_deleted(&self) -> Subscription<EntityDeletedEvent> {
        self.entity_deleted.subscribe()
    }

    pub fn subscribe_relationship_created(&self) -> Subscription<RelationshipEvent> {
        self.relationship_created.subscribe()
    }

    pub fn subscribe_relationship_deleted(&self) -> Subscription<RelationshipDeletedEvent> {
        self.relationship_deleted.subscribe()
    }

    pub fn subscribe_file_change(&self) -> Subscription<FileChangeEvent> {
        self.file_change.subscribe()
    }

    /// Replays the last known status immediately so a subscriber that joins
    /// mid-sync does not have to wait for the next transition to learn the
    /// current state (the general case, common to every topic, is handled by
    /// `Topic::subscribe`; `syncStatus` is singled out in §4.9 as the topic
    /// where this matters most, so its replay value is also handed back
    /// directly for callers that want it without an `await`).
    pub fn subscribe_sync_status(&self) -> (Option<SyncStatusEvent>, Subscription<SyncStatusEvent>) {
        (self.sync_status.last(), self.sync_status.subscribe())
    }

    pub fn subscribe_shutdown(&self) -> Subscription<ShutdownEvent> {
        self.shutdown.subscribe()
    }

    /// Aggregate, cumulative-since-start dropped-frame counts per topic (§5's
    /// backpressure-by-drop contract) — not broken down by individual
    /// subscriber, since a dropped broadcast frame is indistinguishable from
    /// the sender's point of view.
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            entity_created_dropped: self.entity_created.dropped(),
            entity_updated_dropped: self.entity_updated.dropped(),
            entity_deleted_dropped: self.entity_deleted.dropped(),
            relationship_created_dropped: self.relationship_created.dropped(),
            relationship_deleted_dropped: self.relationship_deleted.dropped(),
            file_change_dropped: self.file_change.dropped(),
            sync_status_dropped: self.sync_status.dropped(),
            shutdown_dropped: self.shutdown.dropped(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memento_storage::domain::{Entity, EntityKind, FileEntity};

    fn sample_entity() -> Entity {
        Entity::new("file:a.ts", "a.ts", "h1", EntityKind::File(FileEntity::new("ts", 1, 1, false, false)))
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_entity_created() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_entity_created();
        bus.publish_entity_created(sample_entity());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity.id, "file:a.ts");
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_last_entity_created() {
        let bus = EventBus::new();
        bus.publish_entity_created(sample_entity());
        // Subscribing after the publish should still see it (recency replay, §4.10).
        let mut rx = bus.subscribe_entity_created();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity.id, "file:a.ts");
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_last_sync_status() {
        let bus = EventBus::new();
        bus.publish_sync_status(SyncStatusKind::Syncing, 3);
        let (last, _rx) = bus.subscribe_sync_status();
        assert_eq!(last.unwrap().pending_jobs, 3);
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let bus = EventBus::new();
        let mut file_rx = bus.subscribe_file_change();
        bus.publish_entity_created(sample_entity());
        bus.publish_file_change("a.ts", "modify");
        let event = file_rx.recv().await.unwrap();
        assert_eq!(event.path, "a.ts");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_entity_deleted("file:gone.ts");
    }
}
