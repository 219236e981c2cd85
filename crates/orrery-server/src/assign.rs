//! The assignment engine: pairs due planets with idle workers.
//!
//! Fires on a periodic tick and on "worker became idle" / "planet became
//! due" nudges. The tick guarantees liveness if a nudge is ever lost; the
//! nudge keeps latency low in normal operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::{debug, info, warn};

use orrery_proto::OutboundFrame;
use orrery_state::{
    PendingQueue, Planet, PlanetStatus, Store, TaskHistory, TaskStatus, Worker, WorkerStatus,
};

use crate::clock::Clock;
use crate::config::AssignmentConfig;
use crate::error::Result;
use crate::registry::SessionRegistry;

/// Matches due planets to idle workers and performs the atomic
/// queued→processing / idle→busy transition.
pub struct AssignmentEngine {
    store: Arc<dyn Store>,
    queue: Arc<dyn PendingQueue>,
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    config: AssignmentConfig,
    /// Serializes assignment commits with completion and recovery updates.
    lock: Mutex<()>,
    signal: Notify,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn PendingQueue>,
        registry: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
        config: AssignmentConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            clock,
            config,
            lock: Mutex::new(()),
            signal: Notify::new(),
        }
    }

    /// Requests an assignment pass outside the regular tick.
    pub fn nudge(&self) {
        self.signal.notify_one();
    }

    /// Takes the assignment lock. Completion and recovery paths hold this
    /// while they touch planet/worker pairs so no transition can interleave
    /// with an assignment commit.
    pub(crate) async fn lock_assignments(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Runs passes forever, on the tick interval and on nudges.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.signal.notified() => {}
            }

            if let Err(e) = self.run_once().await {
                warn!(error = %e, "assignment pass failed");
            }
        }
    }

    /// One assignment pass. Returns the number of planets dispatched.
    /// Idempotent and safe to run concurrently with itself.
    pub async fn run_once(&self) -> Result<usize> {
        let now = self.clock.now();

        let idle = self.idle_candidates().await?;
        if idle.is_empty() {
            debug!("no idle workers with live sessions");
            return Ok(0);
        }

        let mut due = match self.queue.due(now, idle.len()).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "index unavailable, falling back to store scan");
                Vec::new()
            }
        };

        if due.is_empty() {
            due = self.recover_missed(now, idle.len()).await?;
        }

        if due.is_empty() {
            return Ok(0);
        }

        info!(due = due.len(), idle = idle.len(), "assigning planets");

        let mut assigned = 0;
        for ((planet_id, snapshot_due), worker) in due.into_iter().zip(idle) {
            let _guard = self.lock.lock().await;
            match self
                .try_assign(&planet_id, snapshot_due, &worker.server_id, now)
                .await
            {
                Ok(true) => assigned += 1,
                Ok(false) => {}
                Err(e) => warn!(planet_id, error = %e, "error assigning planet"),
            }
        }

        Ok(assigned)
    }

    /// Idle workers with live sessions, least-loaded first.
    async fn idle_candidates(&self) -> Result<Vec<Worker>> {
        let idle = self.store.idle_workers(self.config.batch_limit).await?;
        Ok(idle
            .into_iter()
            .filter(|w| self.registry.is_live(&w.server_id))
            .collect())
    }

    /// Store fallback when the index came back empty: queued planets past
    /// their due time are re-indexed and handed to this pass directly.
    async fn recover_missed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>> {
        let missed = self.store.due_queued_planets(now, limit).await?;
        if missed.is_empty() {
            return Ok(Vec::new());
        }

        warn!(
            count = missed.len(),
            "queued planets in store missing from the index, re-queueing"
        );

        let mut recovered = Vec::new();
        for planet in missed {
            if let Err(e) = self
                .queue
                .put(&planet.planet_id, planet.next_round_time)
                .await
            {
                warn!(planet_id = %planet.planet_id, error = %e, "failed to re-index planet");
                continue;
            }
            recovered.push((planet.planet_id, planet.next_round_time));
        }

        Ok(recovered)
    }

    /// Attempts one pair under the assignment lock. Returns false when the
    /// pair aborts; both entities are left untouched in that case.
    async fn try_assign(
        &self,
        planet_id: &str,
        snapshot_due: DateTime<Utc>,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut planet) = self.store.get_planet(planet_id).await? else {
            debug!(planet_id, "planet vanished, dropping stale index entry");
            let _ = self.queue.remove(planet_id).await;
            return Ok(false);
        };

        if !planet.is_schedulable() {
            debug!(planet_id, status = planet.status.as_str(), "planet not schedulable");
            let _ = self.queue.remove(planet_id).await;
            return Ok(false);
        }

        // Optimistic check: a completion or recovery may have moved the due
        // time between the index snapshot and this commit.
        if planet.next_round_time.timestamp_millis() != snapshot_due.timestamp_millis() {
            debug!(planet_id, "due time changed since snapshot");
            return Ok(false);
        }

        let Some(mut worker) = self.store.get_worker(worker_id).await? else {
            return Ok(false);
        };
        if worker.status != WorkerStatus::Idle || worker.current_task.is_some() {
            debug!(worker_id, status = worker.status.as_str(), "worker no longer idle");
            return Ok(false);
        }
        let Some(handle) = self.registry.get(worker_id) else {
            return Ok(false);
        };

        // Reserve the outbound slot before committing; a full queue means
        // the worker is stuck and the planet stays in the index.
        let frame = OutboundFrame::AssignJob {
            planet_id: planet.planet_id.clone(),
            season_id: planet.season_id,
            round_id: planet.round_id,
        };
        if handle.try_send(frame).is_err() {
            warn!(worker_id, "outbound queue full, aborting assignment");
            return Ok(false);
        }

        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some(worker_id.to_owned());
        self.store.update_planet(&planet).await?;

        worker.status = WorkerStatus::Busy;
        worker.current_task = Some(planet.planet_id.clone());
        worker.total_assigned += 1;
        self.store.update_worker(&worker).await?;

        self.record_start(&planet, worker_id, now).await?;

        if let Err(e) = self.queue.remove(&planet.planet_id).await {
            warn!(planet_id, error = %e, "failed to remove assigned planet from index");
        }

        info!(planet_id = %planet.planet_id, worker_id, "job assigned");
        Ok(true)
    }

    /// Opens the history row for this attempt. A retry reuses the planet's
    /// latest failed row so a failing planet cannot flood the table; the
    /// accumulated error message stays on the row.
    async fn record_start(
        &self,
        planet: &Planet,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if planet.error_retry_count > 0 {
            if let Some(mut row) = self.store.latest_failed_history(&planet.planet_id).await? {
                row.server_id = worker_id.to_owned();
                row.status = TaskStatus::Started;
                row.start_time = now;
                row.end_time = None;
                row.duration_seconds = None;
                self.store.update_history(&row).await?;
                return Ok(());
            }
        }

        self.store
            .insert_history(&TaskHistory::started(&planet.planet_id, worker_id, now))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for AssignmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
