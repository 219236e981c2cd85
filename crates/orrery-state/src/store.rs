//! The durable store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::types::{Planet, PlanetStatus, TaskHistory, Worker, WorkerStatus};

/// Durable storage for planets, workers, and task history.
///
/// The store is authoritative; the pending-due index is rebuilt from it
/// whenever the two disagree.
#[async_trait]
pub trait Store: Send + Sync {
    // --- planets ---

    /// Inserts a new planet. Fails with [`StoreError::AlreadyExists`] on a
    /// duplicate `planet_id`.
    async fn insert_planet(&self, planet: &Planet) -> Result<(), StoreError>;

    async fn get_planet(&self, planet_id: &str) -> Result<Option<Planet>, StoreError>;

    /// Writes a planet row back in full, keyed on `planet_id`.
    async fn update_planet(&self, planet: &Planet) -> Result<(), StoreError>;

    /// Deletes a planet and its history rows. Returns false if absent.
    async fn delete_planet(&self, planet_id: &str) -> Result<bool, StoreError>;

    async fn planets_with_status(&self, status: PlanetStatus)
        -> Result<Vec<Planet>, StoreError>;

    async fn count_planets_with_status(&self, status: PlanetStatus)
        -> Result<u64, StoreError>;

    /// Queued planets with `next_round_time <= now`, oldest first. The DB
    /// fallback when the index has drifted empty.
    async fn due_queued_planets(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Planet>, StoreError>;

    /// All planets eligible for the pending-due index (queued or error).
    async fn schedulable_planets(&self) -> Result<Vec<Planet>, StoreError>;

    // --- workers ---

    /// Inserts or replaces a worker row, keyed on `server_id`.
    async fn upsert_worker(&self, worker: &Worker) -> Result<(), StoreError>;

    async fn get_worker(&self, server_id: &str) -> Result<Option<Worker>, StoreError>;

    async fn update_worker(&self, worker: &Worker) -> Result<(), StoreError>;

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError>;

    async fn workers_with_status(&self, status: WorkerStatus)
        -> Result<Vec<Worker>, StoreError>;

    async fn count_workers_with_status(&self, status: WorkerStatus)
        -> Result<u64, StoreError>;

    /// Idle workers ordered least-loaded first (`total_completed` ascending,
    /// ties broken by `connected_at` ascending).
    async fn idle_workers(&self, limit: usize) -> Result<Vec<Worker>, StoreError>;

    /// Workers in idle, busy, or not_responding whose `last_heartbeat` is
    /// older than `cutoff`.
    async fn stale_workers(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>, StoreError>;

    // --- task history ---

    /// Inserts a history row and returns its id.
    async fn insert_history(&self, history: &TaskHistory) -> Result<i64, StoreError>;

    /// Writes a history row back in full, keyed on `id`.
    async fn update_history(&self, history: &TaskHistory) -> Result<(), StoreError>;

    /// The most recent open `started` row for (planet, server), if any.
    async fn open_history(
        &self,
        planet_id: &str,
        server_id: &str,
    ) -> Result<Option<TaskHistory>, StoreError>;

    /// The most recent `failed` row for a planet, reused across retries.
    async fn latest_failed_history(
        &self,
        planet_id: &str,
    ) -> Result<Option<TaskHistory>, StoreError>;
}
