//! In-process subscriber store.
//!
//! Used by tests and by embedders that keep subscriptions elsewhere and
//! only need the engine's view of them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyMaterial, StoreResult, SubscriberRecord, SubscriberStore, TopicSummary};

/// Subscriber store backed by an ordered map keyed by `(topic, endpoint)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<(String, String), SubscriberRecord>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across topics.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Whether `endpoint` is subscribed to `topic`.
    pub async fn contains(&self, topic: &str, endpoint: &str) -> bool {
        self.records
            .read()
            .await
            .contains_key(&(topic.to_string(), endpoint.to_string()))
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn list_by_topic(&self, topic: &str) -> StoreResult<Vec<SubscriberRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect())
    }

    async fn upsert(&self, topic: &str, endpoint: &str, keys: KeyMaterial) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records
            .entry((topic.to_string(), endpoint.to_string()))
            .and_modify(|r| r.keys = keys.clone())
            .or_insert_with(|| SubscriberRecord::new(topic, endpoint, keys));
        Ok(())
    }

    async fn delete_by_endpoint(&self, endpoint: &str) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(_, e), _| e != endpoint);
        Ok((before - records.len()) as u64)
    }

    async fn unsubscribe(&self, topic: &str, endpoint: &str) -> StoreResult<bool> {
        Ok(self
            .records
            .write()
            .await
            .remove(&(topic.to_string(), endpoint.to_string()))
            .is_some())
    }

    async fn delete_topic(&self, topic: &str) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(t, _), _| t != topic);
        Ok((before - records.len()) as u64)
    }

    async fn list_topics(&self) -> StoreResult<Vec<TopicSummary>> {
        let records = self.records.read().await;
        let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
        for (topic, _) in records.keys() {
            *counts.entry(topic.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(name, subscriber_count)| TopicSummary {
                name: name.to_string(),
                subscriber_count,
            })
            .collect())
    }
}
