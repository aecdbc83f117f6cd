//! In-memory reference store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::Message;
use crate::store::{ChannelPreference, PerformanceRecord, ReceiptRecord, SendLogEntry, Store};

/// Reference [`Store`] backed by `RwLock`-guarded maps. Suitable for tests
/// and single-process deployments; everything is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<Uuid, Message>>,
    receipts: RwLock<HashMap<Uuid, Vec<ReceiptRecord>>>,
    send_log: RwLock<Vec<SendLogEntry>>,
    performance: RwLock<HashMap<(String, Option<String>), PerformanceRecord>>,
    preferences: RwLock<HashMap<(String, String), ChannelPreference>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct messages stored. Test convenience.
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_message(&self, message: &Message) -> Result<bool, StoreError> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.id) {
            return Ok(false);
        }
        messages.insert(message.id, message.clone());
        Ok(true)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn insert_receipt(&self, receipt: ReceiptRecord) -> Result<(), StoreError> {
        self.receipts
            .write()
            .await
            .entry(receipt.message_id)
            .or_default()
            .push(receipt);
        Ok(())
    }

    async fn first_receipt(&self, message_id: Uuid) -> Result<Option<ReceiptRecord>, StoreError> {
        Ok(self
            .receipts
            .read()
            .await
            .get(&message_id)
            .and_then(|rs| rs.iter().min_by_key(|r| r.received_at))
            .cloned())
    }

    async fn receipts(&self, message_id: Uuid) -> Result<Vec<ReceiptRecord>, StoreError> {
        let mut receipts = self
            .receipts
            .read()
            .await
            .get(&message_id)
            .cloned()
            .unwrap_or_default();
        receipts.sort_by_key(|r| r.received_at);
        Ok(receipts)
    }

    async fn append_send_log(&self, entry: SendLogEntry) -> Result<(), StoreError> {
        self.send_log.write().await.push(entry);
        Ok(())
    }

    async fn send_log_since(&self, window: Duration) -> Result<Vec<SendLogEntry>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window)
                .map_err(|e| StoreError::Query(format!("window out of range: {e}")))?;
        Ok(self
            .send_log
            .read()
            .await
            .iter()
            .filter(|e| e.sent_at >= cutoff)
            .cloned()
            .collect())
    }

    async fn upsert_performance(&self, record: PerformanceRecord) -> Result<(), StoreError> {
        let key = (record.channel.clone(), record.endpoint.clone());
        self.performance.write().await.insert(key, record);
        Ok(())
    }

    async fn load_performance(&self) -> Result<Vec<PerformanceRecord>, StoreError> {
        Ok(self.performance.read().await.values().cloned().collect())
    }

    async fn upsert_preference(&self, preference: ChannelPreference) -> Result<(), StoreError> {
        let key = (
            preference.peer_locator.clone(),
            preference.channel.clone(),
        );
        self.preferences.write().await.insert(key, preference);
        Ok(())
    }

    async fn preferences_for(
        &self,
        peer_locator: &str,
    ) -> Result<Vec<ChannelPreference>, StoreError> {
        let mut prefs: Vec<ChannelPreference> = self
            .preferences
            .read()
            .await
            .values()
            .filter(|p| p.peer_locator == peer_locator)
            .cloned()
            .collect();
        prefs.sort_by(|a, b| a.channel.cmp(&b.channel));
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn message() -> Message {
        Message::data(&Identity::generate().locator(), "test")
    }

    fn receipt(message_id: Uuid, channel: &str, offset_ms: i64, latency_ms: u64) -> ReceiptRecord {
        ReceiptRecord {
            message_id,
            channel: channel.to_string(),
            endpoint: None,
            received_at: Utc::now() + chrono::Duration::milliseconds(offset_ms),
            latency_ms,
        }
    }

    #[tokio::test]
    async fn test_insert_message_is_idempotent() {
        let store = MemoryStore::new();
        let msg = message();

        assert!(store.insert_message(&msg).await.unwrap());
        assert!(!store.insert_message(&msg).await.unwrap());
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_message() {
        let store = MemoryStore::new();
        let msg = message();
        store.insert_message(&msg).await.unwrap();

        let loaded = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, msg.id);
        assert!(store.get_message(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_receipt_is_earliest() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store
            .insert_receipt(receipt(id, "mesh", 250, 250))
            .await
            .unwrap();
        store.insert_receipt(receipt(id, "relay", 0, 0)).await.unwrap();

        let first = store.first_receipt(id).await.unwrap().unwrap();
        assert_eq!(first.channel, "relay");
        assert_eq!(first.latency_ms, 0);
    }

    #[tokio::test]
    async fn test_receipts_ordered_by_received_at() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store.insert_receipt(receipt(id, "b", 100, 100)).await.unwrap();
        store.insert_receipt(receipt(id, "a", 0, 0)).await.unwrap();
        store.insert_receipt(receipt(id, "c", 300, 300)).await.unwrap();

        let receipts = store.receipts(id).await.unwrap();
        let channels: Vec<&str> = receipts.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(channels, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_send_log_trailing_window() {
        let store = MemoryStore::new();
        let mk = |age_secs: i64| SendLogEntry {
            message_id: Uuid::new_v4(),
            channel: "relay".to_string(),
            endpoint: None,
            success: true,
            latency_ms: Some(10),
            error: None,
            sent_at: Utc::now() - chrono::Duration::seconds(age_secs),
        };

        store.append_send_log(mk(0)).await.unwrap();
        store.append_send_log(mk(30)).await.unwrap();
        store.append_send_log(mk(90)).await.unwrap();

        let recent = store.send_log_since(Duration::from_secs(60)).await.unwrap();
        assert_eq!(recent.len(), 2);
        let cutoff = Utc::now() - chrono::Duration::seconds(60);
        assert!(recent.iter().all(|e| e.sent_at >= cutoff));
    }

    #[tokio::test]
    async fn test_upsert_performance_replaces_by_key() {
        let store = MemoryStore::new();
        let mut record = PerformanceRecord::new("relay", Some("wss://a"));
        record.total_sent = 1;
        store.upsert_performance(record.clone()).await.unwrap();

        record.total_sent = 2;
        store.upsert_performance(record).await.unwrap();

        let all = store.load_performance().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].total_sent, 2);
    }

    #[tokio::test]
    async fn test_preferences_scoped_per_peer() {
        let store = MemoryStore::new();
        let mut a = ChannelPreference::learned("peer-a", "relay");
        a.is_working = true;
        store.upsert_preference(a).await.unwrap();
        store
            .upsert_preference(ChannelPreference::learned("peer-a", "mesh"))
            .await
            .unwrap();
        store
            .upsert_preference(ChannelPreference::learned("peer-b", "relay"))
            .await
            .unwrap();

        let prefs = store.preferences_for("peer-a").await.unwrap();
        assert_eq!(prefs.len(), 2);
        // Sorted by channel name.
        assert_eq!(prefs[0].channel, "mesh");
        assert_eq!(prefs[1].channel, "relay");
    }
}
