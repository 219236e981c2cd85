//! Valkey/Redis adapter for the pending-due index.
//!
//! One sorted set holds the whole frontier: member = planet id, score =
//! due time as fractional epoch seconds. ZADD gives upsert, ZRANGEBYSCORE
//! gives the due query, and every command is individually atomic, which is
//! all the index needs (composite transitions are covered by the assignment
//! lock upstream).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};

use crate::error::QueueError;
use crate::queue::{from_score, to_score, PendingQueue};

/// Default sorted-set key.
pub const DEFAULT_QUEUE_KEY: &str = "planet_round_queue";

/// Valkey/Redis pending-due index.
#[derive(Clone)]
pub struct ValkeyPendingQueue {
    pool: Pool,
    key: String,
}

impl ValkeyPendingQueue {
    /// Creates a new Valkey-backed index and verifies the connection.
    pub async fn new(url: &str, key: String, pool_size: usize) -> Result<Self, QueueError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| QueueError::Connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        // Test the connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self { pool, key })
    }
}

#[async_trait]
impl PendingQueue for ValkeyPendingQueue {
    async fn put(&self, planet_id: &str, due: DateTime<Utc>) -> Result<(), QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        conn.zadd::<_, _, _, ()>(&self.key, planet_id, to_score(due))
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, planet_id: &str) -> Result<(), QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        conn.zrem::<_, _, ()>(&self.key, planet_id)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let entries: Vec<(String, f64)> = deadpool_redis::redis::cmd("ZRANGEBYSCORE")
            .arg(&self.key)
            .arg(0)
            .arg(to_score(now))
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|(id, score)| (id, from_score(score)))
            .collect())
    }

    async fn peek_next(&self) -> Result<Option<(String, DateTime<Utc>)>, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let entries: Vec<(String, f64)> = deadpool_redis::redis::cmd("ZRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(entries
            .into_iter()
            .next()
            .map(|(id, score)| (id, from_score(score))))
    }

    async fn entries(&self) -> Result<Vec<(String, DateTime<Utc>)>, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let entries: Vec<(String, f64)> = deadpool_redis::redis::cmd("ZRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut *conn)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|(id, score)| (id, from_score(score)))
            .collect())
    }

    async fn size(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let count: u64 = conn
            .zcard(&self.key)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(count)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        conn.del::<_, ()>(&self.key)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Debug for ValkeyPendingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyPendingQueue")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
