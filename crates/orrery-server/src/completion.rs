//! Completion handling: the job_done / job_skipped / error paths.
//!
//! Every path validates that the reporting worker still owns the planet;
//! a mismatch means the report is stale (the planet was reclaimed or
//! deleted) and is logged and dropped with no side effects.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use orrery_proto::{JobDone, JobError, JobSkipped};
use orrery_state::{
    PendingQueue, Planet, PlanetStatus, Store, TaskStatus, Worker, WorkerStatus,
};

use crate::assign::AssignmentEngine;
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::error::Result;

/// Processes job outcomes reported over the worker channel (or the HTTP
/// fallback) and returns the pair to a dispatchable state.
pub struct CompletionHandler {
    store: Arc<dyn Store>,
    queue: Arc<dyn PendingQueue>,
    clock: Arc<dyn Clock>,
    engine: Arc<AssignmentEngine>,
    retry: RetryConfig,
}

impl CompletionHandler {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn PendingQueue>,
        clock: Arc<dyn Clock>,
        engine: Arc<AssignmentEngine>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            engine,
            retry,
        }
    }

    /// Success path: advance round bookkeeping, requeue at the supplied
    /// time, credit the worker, close the history row.
    pub async fn handle_job_done(&self, server_id: &str, done: JobDone) -> Result<()> {
        let guard = self.engine.lock_assignments().await;
        let now = self.clock.now();

        let Some((mut planet, mut worker)) =
            self.validated_pair(&done.planet_id, server_id).await?
        else {
            return Ok(());
        };

        // A next_round_time that already passed during calculation would
        // schedule into the past; clamp so the planet is picked up now.
        let mut next = done.next_round_time;
        if next <= now {
            warn!(
                planet_id = %planet.planet_id,
                supplied = %next,
                "next_round_time is in the past, scheduling immediately"
            );
            next = now;
        }

        // The worker is authoritative for game state when it supplies it.
        planet.round_id = done.round_id.unwrap_or(planet.round_id + 1);
        planet.current_round_number = done
            .round_number
            .unwrap_or(planet.current_round_number + 1);
        if let Some(season_id) = done.season_id {
            planet.season_id = season_id;
        }
        planet.status = PlanetStatus::Queued;
        planet.next_round_time = next;
        planet.last_processed = Some(now);
        planet.processing_server_id = None;
        planet.error_retry_count = 0;
        self.store.update_planet(&planet).await?;

        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        worker.total_completed += 1;
        self.store.update_worker(&worker).await?;

        self.close_history(&planet.planet_id, server_id, now, TaskStatus::Completed, None)
            .await?;

        if let Err(e) = self.queue.put(&planet.planet_id, next).await {
            warn!(planet_id = %planet.planet_id, error = %e, "failed to requeue completed planet");
        }

        info!(
            planet_id = %planet.planet_id,
            server_id,
            round_id = planet.round_id,
            next_round_time = %next,
            "job completed and requeued"
        );

        drop(guard);
        self.engine.nudge();
        Ok(())
    }

    /// Skip path: the worker declined the round. The planet is requeued at
    /// the supplied time and the worker is freed, but no completion credit
    /// is granted and round bookkeeping does not advance.
    pub async fn handle_job_skipped(&self, server_id: &str, skipped: JobSkipped) -> Result<()> {
        let guard = self.engine.lock_assignments().await;
        let now = self.clock.now();

        let Some((mut planet, mut worker)) =
            self.validated_pair(&skipped.planet_id, server_id).await?
        else {
            return Ok(());
        };

        let mut next = skipped.next_round_time;
        if next <= now {
            next = now;
        }

        planet.status = PlanetStatus::Queued;
        planet.next_round_time = next;
        planet.processing_server_id = None;
        self.store.update_planet(&planet).await?;

        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        self.store.update_worker(&worker).await?;

        let note = format!(
            "skipped: {}",
            skipped.reason.as_deref().unwrap_or("no reason given")
        );
        self.close_history(
            &planet.planet_id,
            server_id,
            now,
            TaskStatus::Completed,
            Some(note),
        )
        .await?;

        if let Err(e) = self.queue.put(&planet.planet_id, next).await {
            warn!(planet_id = %planet.planet_id, error = %e, "failed to requeue skipped planet");
        }

        info!(planet_id = %planet.planet_id, server_id, "job skipped, planet requeued");

        drop(guard);
        self.engine.nudge();
        Ok(())
    }

    /// Failure path: free the worker, count the failure, and requeue with
    /// exponential backoff (1, 2, 4, 8, 16 s). Backoff never schedules the
    /// retry earlier than the round's own due time. The failure after the
    /// budget is spent resets the counter and parks the planet for the
    /// cooldown instead.
    pub async fn handle_job_error(&self, server_id: &str, report: JobError) -> Result<()> {
        let Some(planet_id) = report.planet_id.clone() else {
            warn!(server_id, error = report.message(), "error report without planet_id");
            return Ok(());
        };

        let guard = self.engine.lock_assignments().await;
        let now = self.clock.now();

        let Some((mut planet, mut worker)) = self.validated_pair(&planet_id, server_id).await?
        else {
            return Ok(());
        };

        planet.error_retry_count += 1;
        let attempt = planet.error_retry_count;

        error!(
            planet_id,
            server_id,
            attempt,
            max = self.retry.max_retries,
            message = report.message(),
            "job failed"
        );

        let note = format!(
            "[Retry {attempt}/{}] {}",
            self.retry.max_retries,
            report.message()
        );
        self.close_history(&planet_id, server_id, now, TaskStatus::Failed, Some(note))
            .await?;

        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        worker.total_failed += 1;
        self.store.update_worker(&worker).await?;

        let due = if attempt <= self.retry.max_retries {
            let backoff = ChronoDuration::seconds(1_i64 << (attempt - 1).min(30));
            (now + backoff).max(planet.next_round_time)
        } else {
            warn!(
                planet_id,
                "retry budget exhausted, resetting counter and applying cooldown"
            );
            planet.error_retry_count = 0;
            now + ChronoDuration::from_std(self.retry.reset_cooldown)
                .unwrap_or_else(|_| ChronoDuration::seconds(30))
        };

        planet.status = PlanetStatus::Error;
        planet.processing_server_id = None;
        planet.next_round_time = due;
        self.store.update_planet(&planet).await?;

        if let Err(e) = self.queue.put(&planet_id, due).await {
            warn!(planet_id, error = %e, "failed to requeue failed planet");
        }

        drop(guard);
        self.engine.nudge();
        Ok(())
    }

    /// Looks up the (planet, worker) pair and verifies the worker still owns
    /// the job. Returns None for stale or unknown reports.
    async fn validated_pair(
        &self,
        planet_id: &str,
        server_id: &str,
    ) -> Result<Option<(Planet, Worker)>> {
        let Some(planet) = self.store.get_planet(planet_id).await? else {
            warn!(planet_id, server_id, "completion for unknown planet, dropping");
            return Ok(None);
        };

        let Some(worker) = self.store.get_worker(server_id).await? else {
            warn!(planet_id, server_id, "completion from unknown worker, dropping");
            return Ok(None);
        };

        if planet.processing_server_id.as_deref() != Some(server_id) {
            warn!(
                planet_id,
                server_id,
                owner = planet.processing_server_id.as_deref().unwrap_or("none"),
                "stale completion, dropping"
            );
            return Ok(None);
        }

        Ok(Some((planet, worker)))
    }

    /// Closes the open history row for this attempt.
    async fn close_history(
        &self,
        planet_id: &str,
        server_id: &str,
        now: DateTime<Utc>,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        if let Some(mut row) = self.store.open_history(planet_id, server_id).await? {
            row.status = status;
            row.end_time = Some(now);
            row.duration_seconds =
                Some((now - row.start_time).num_milliseconds() as f64 / 1000.0);
            if error_message.is_some() {
                row.error_message = error_message;
            }
            self.store.update_history(&row).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
