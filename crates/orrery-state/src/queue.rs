//! The pending-due index: a time-scored set of planets awaiting dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use crate::error::QueueError;

/// Time-ordered mapping of `planet_id → next_round_time`.
///
/// Backed by a sorted set: the member is the planet id and the score is the
/// due time as fractional epoch seconds. Writes are best-effort; the store
/// remains authoritative and the health loop repairs drift.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    /// Upserts a planet with the given due time.
    async fn put(&self, planet_id: &str, due: DateTime<Utc>) -> Result<(), QueueError>;

    /// Removes a planet. Removing an absent member is not an error.
    async fn remove(&self, planet_id: &str) -> Result<(), QueueError>;

    /// Planets due at or before `now`, oldest first, at most `limit`.
    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>, QueueError>;

    /// The soonest-due entry without removing it.
    async fn peek_next(&self) -> Result<Option<(String, DateTime<Utc>)>, QueueError>;

    /// Every entry, soonest first. Used by drift reconciliation.
    async fn entries(&self) -> Result<Vec<(String, DateTime<Utc>)>, QueueError>;

    /// Number of queued entries.
    async fn size(&self) -> Result<u64, QueueError>;

    /// Removes all members. Used by the startup rebuild.
    async fn clear(&self) -> Result<(), QueueError>;
}

/// Converts a datetime to a sorted-set score (fractional epoch seconds).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub(crate) fn to_score(due: DateTime<Utc>) -> f64 {
    due.timestamp_millis() as f64 / 1000.0
}

/// Converts a sorted-set score back to a datetime.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn from_score(score: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt((score * 1000.0).round() as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

/// In-memory pending-due index for tests and the no-Valkey fallback.
#[derive(Debug, Clone, Default)]
pub struct MemoryPendingQueue {
    scores: Arc<Mutex<HashMap<String, f64>>>,
}

impl MemoryPendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn sorted(&self) -> Vec<(String, f64)> {
        let scores = self.scores.lock().await;
        let mut entries: Vec<(String, f64)> =
            scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        entries
    }
}

#[async_trait]
impl PendingQueue for MemoryPendingQueue {
    async fn put(&self, planet_id: &str, due: DateTime<Utc>) -> Result<(), QueueError> {
        let mut scores = self.scores.lock().await;
        scores.insert(planet_id.to_owned(), to_score(due));
        Ok(())
    }

    async fn remove(&self, planet_id: &str) -> Result<(), QueueError> {
        let mut scores = self.scores.lock().await;
        scores.remove(planet_id);
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>, QueueError> {
        let now_score = to_score(now);
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|(_, score)| *score <= now_score)
            .take(limit)
            .map(|(id, score)| (id, from_score(score)))
            .collect())
    }

    async fn peek_next(&self) -> Result<Option<(String, DateTime<Utc>)>, QueueError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .next()
            .map(|(id, score)| (id, from_score(score))))
    }

    async fn entries(&self) -> Result<Vec<(String, DateTime<Utc>)>, QueueError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .map(|(id, score)| (id, from_score(score)))
            .collect())
    }

    async fn size(&self) -> Result<u64, QueueError> {
        let scores = self.scores.lock().await;
        Ok(scores.len() as u64)
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut scores = self.scores.lock().await;
        scores.clear();
        Ok(())
    }
}
