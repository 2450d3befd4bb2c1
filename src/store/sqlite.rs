//! SQLite subscriber store.
//!
//! Schema lives in `migrations/` and is embedded at compile time. File
//! databases run in WAL mode so delivery workers pruning dead endpoints do
//! not block a concurrent publish listing subscribers.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, SqlitePool};

use super::{KeyMaterial, StoreResult, SubscriberRecord, SubscriberStore, TopicSummary};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    topic: String,
    endpoint: String,
    p256dh: String,
    auth: String,
    created_at: DateTime<Utc>,
}

impl From<SubscriptionRow> for SubscriberRecord {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            topic: row.topic,
            endpoint: row.endpoint,
            keys: KeyMaterial {
                p256dh: row.p256dh,
                auth: row.auth,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TopicRow {
    topic: String,
    subscriber_count: i64,
}

/// Subscriber store on a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        log::info!("[Store] Opened subscriber database {:?}", path.as_ref());
        Self::from_pool(pool).await
    }

    /// Fresh in-memory database (tests).
    pub async fn in_memory() -> StoreResult<Self> {
        // A single connection: every new in-memory connection is a new database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and run pending migrations.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SubscriberStore for SqliteStore {
    async fn list_by_topic(&self, topic: &str) -> StoreResult<Vec<SubscriberRecord>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT topic, endpoint, p256dh, auth, created_at
             FROM subscriptions WHERE topic = ? ORDER BY id",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SubscriberRecord::from).collect())
    }

    async fn upsert(&self, topic: &str, endpoint: &str, keys: KeyMaterial) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO subscriptions (topic, endpoint, p256dh, auth, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(topic, endpoint) DO UPDATE SET
                p256dh = excluded.p256dh,
                auth = excluded.auth
            ",
        )
        .bind(topic)
        .bind(endpoint)
        .bind(&keys.p256dh)
        .bind(&keys.auth)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        log::debug!("[Store] Upserted subscription for topic '{}'", topic);
        Ok(())
    }

    async fn delete_by_endpoint(&self, endpoint: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE endpoint = ?")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn unsubscribe(&self, topic: &str, endpoint: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE topic = ? AND endpoint = ?")
            .bind(topic)
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_topic(&self, topic: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE topic = ?")
            .bind(topic)
            .execute(&self.pool)
            .await?;
        log::info!(
            "[Store] Deleted topic '{}' ({} subscription(s))",
            topic,
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }

    async fn list_topics(&self) -> StoreResult<Vec<TopicSummary>> {
        let rows = sqlx::query_as::<_, TopicRow>(
            "SELECT topic, COUNT(*) AS subscriber_count
             FROM subscriptions GROUP BY topic ORDER BY topic",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TopicSummary {
                name: row.topic,
                subscriber_count: u64::try_from(row.subscriber_count).unwrap_or_default(),
            })
            .collect())
    }
}
