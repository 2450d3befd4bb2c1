//! Subscriber storage.
//!
//! The engine only needs three operations from storage: list a topic's
//! subscribers, upsert one, and delete by endpoint when the provider says
//! it is gone. The rest of the trait serves the administrative surface.
//!
//! Identity of a record is `(topic, endpoint)`. Subscribing the same
//! endpoint to the same topic again replaces its key material in place.

// Rust guideline compliant 2026-02

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Per-subscriber secrets used for payload encryption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
}

/// One browser registration for one topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    /// Topic the browser subscribed to.
    pub topic: String,
    /// Provider-assigned push endpoint URL.
    pub endpoint: String,
    /// Encryption key material.
    pub keys: KeyMaterial,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
}

impl SubscriberRecord {
    /// New record stamped with the current time.
    pub fn new(topic: impl Into<String>, endpoint: impl Into<String>, keys: KeyMaterial) -> Self {
        Self {
            topic: topic.into(),
            endpoint: endpoint.into(),
            keys,
            created_at: Utc::now(),
        }
    }
}

/// Per-topic subscriber count for administration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    /// Topic name.
    pub name: String,
    /// Number of subscribers.
    pub subscriber_count: u64,
}

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database reported an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed at startup.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The store is closed or otherwise unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Topic → subscriber records.
///
/// Implementations must be safe to call from many delivery workers at once;
/// deletions are idempotent and need no coordination between callers.
#[async_trait]
pub trait SubscriberStore: Send + Sync + std::fmt::Debug {
    /// All subscribers for `topic`. An unknown topic yields an empty list.
    async fn list_by_topic(&self, topic: &str) -> StoreResult<Vec<SubscriberRecord>>;

    /// Insert a subscriber, or replace the key material of an existing one.
    async fn upsert(&self, topic: &str, endpoint: &str, keys: KeyMaterial) -> StoreResult<()>;

    /// Remove an endpoint from every topic. Returns how many rows went away.
    async fn delete_by_endpoint(&self, endpoint: &str) -> StoreResult<u64>;

    /// Remove one endpoint from one topic. Returns whether it existed.
    async fn unsubscribe(&self, topic: &str, endpoint: &str) -> StoreResult<bool>;

    /// Remove every subscriber of `topic`. Returns how many rows went away.
    async fn delete_topic(&self, topic: &str) -> StoreResult<u64>;

    /// Topics with at least one subscriber, sorted by name.
    async fn list_topics(&self) -> StoreResult<Vec<TopicSummary>>;
}
