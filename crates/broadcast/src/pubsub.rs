//! Pub/sub broker seam and the in-memory implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broker seam: per-room fan-out plus a TTL key-value surface.
///
/// Guarantees are per-publisher FIFO within a room and at-most-once
/// delivery per subscription; a slow subscriber that lags only loses its
/// own events.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, room: &str, payload: Value);

    /// Subscribe to a room's live stream.
    fn subscribe(&self, room: &str) -> broadcast::Receiver<Value>;

    /// Set a key that expires after `ttl`. Re-setting refreshes the TTL.
    async fn kv_set_ttl(&self, key: &str, ttl: Duration);

    async fn kv_delete(&self, key: &str);

    /// Whether any live key starts with `prefix`.
    async fn kv_exists_prefix(&self, prefix: &str) -> bool;
}

const ROOM_CAPACITY: usize = 256;

/// Single-process broker backed by tokio broadcast channels.
#[derive(Default)]
pub struct MemoryPubSub {
    rooms: RwLock<HashMap<String, broadcast::Sender<Value>>>,
    keys: RwLock<HashMap<String, Instant>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, room: &str) -> broadcast::Sender<Value> {
        if let Some(sender) = self.rooms.read().get(room) {
            return sender.clone();
        }
        let mut rooms = self.rooms.write();
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone()
    }

    /// Drop expired keys. Called lazily from every KV operation.
    fn purge_expired(&self) {
        let now = Instant::now();
        self.keys.write().retain(|_, expiry| *expiry > now);
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, room: &str, payload: Value) {
        // A send error just means no subscriber is attached right now.
        let _ = self.sender(room).send(payload);
    }

    fn subscribe(&self, room: &str) -> broadcast::Receiver<Value> {
        self.sender(room).subscribe()
    }

    async fn kv_set_ttl(&self, key: &str, ttl: Duration) {
        self.purge_expired();
        self.keys
            .write()
            .insert(key.to_string(), Instant::now() + ttl);
    }

    async fn kv_delete(&self, key: &str) {
        self.keys.write().remove(key);
    }

    async fn kv_exists_prefix(&self, prefix: &str) -> bool {
        self.purge_expired();
        self.keys.read().keys().any(|k| k.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber_in_order() {
        let bus = MemoryPubSub::new();
        let mut rx = bus.subscribe("ts:1");

        bus.publish("ts:1", serde_json::json!({"n": 1})).await;
        bus.publish("ts:1", serde_json::json!({"n": 2})).await;

        assert_eq!(rx.recv().await.unwrap()["n"], 1);
        assert_eq!(rx.recv().await.unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let bus = MemoryPubSub::new();
        let mut rx_other = bus.subscribe("ts:other");
        bus.publish("ts:1", serde_json::json!({"n": 1})).await;
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_break_others() {
        let bus = MemoryPubSub::new();
        let rx_dead = bus.subscribe("ts:1");
        let mut rx_live = bus.subscribe("ts:1");
        drop(rx_dead);

        bus.publish("ts:1", serde_json::json!({"n": 7})).await;
        assert_eq!(rx_live.recv().await.unwrap()["n"], 7);
    }

    #[tokio::test]
    async fn ttl_keys_expire() {
        let bus = MemoryPubSub::new();
        bus.kv_set_ttl("pending_join:m:c", Duration::from_millis(20))
            .await;
        assert!(bus.kv_exists_prefix("pending_join:m:").await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!bus.kv_exists_prefix("pending_join:m:").await);
    }

    #[tokio::test]
    async fn distinct_connections_hold_distinct_keys() {
        let bus = MemoryPubSub::new();
        bus.kv_set_ttl("pending_join:m:c1", Duration::from_secs(5))
            .await;
        bus.kv_set_ttl("pending_join:m:c2", Duration::from_secs(5))
            .await;
        bus.kv_delete("pending_join:m:c1").await;
        assert!(bus.kv_exists_prefix("pending_join:m:").await);
        bus.kv_delete("pending_join:m:c2").await;
        assert!(!bus.kv_exists_prefix("pending_join:m:").await);
    }
}
