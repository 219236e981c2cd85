//! Startup reconciliation.
//!
//! A process restart severs every worker channel, but the store still shows
//! workers idle or busy and planets mid-processing. This runs once, before
//! the loops start, to reset the world to a state that matches reality.

use std::sync::Arc;

use tracing::{info, warn};

use orrery_state::{PendingQueue, PlanetStatus, Store, WorkerStatus};

use crate::clock::Clock;
use crate::error::Result;
use crate::recovery::release_orphaned_planet;

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Workers reset to offline.
    pub workers_reset: usize,
    /// Planets recovered out of a stuck processing state.
    pub planets_recovered: usize,
    /// Index entries after the rebuild.
    pub planets_indexed: usize,
}

/// One-shot startup reconciler.
pub struct StartupReconciler {
    store: Arc<dyn Store>,
    queue: Arc<dyn PendingQueue>,
    clock: Arc<dyn Clock>,
}

impl StartupReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn PendingQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    /// Marks every worker offline, recovers stuck planets, and rebuilds the
    /// pending-due index from the store.
    pub async fn run(&self) -> Result<ReconcileReport> {
        let now = self.clock.now();
        let mut report = ReconcileReport::default();

        // Connections did not survive the restart; the records must agree.
        for mut worker in self.store.list_workers().await? {
            if worker.status == WorkerStatus::Offline && worker.current_task.is_none() {
                continue;
            }

            let released = release_orphaned_planet(
                &self.store,
                &self.queue,
                &worker,
                Some(now),
                now,
                "Orchestrator restart - server connection lost",
            )
            .await?;
            if released.is_some() {
                report.planets_recovered += 1;
            }

            worker.status = WorkerStatus::Offline;
            worker.current_task = None;
            self.store.update_worker(&worker).await?;
            report.workers_reset += 1;
        }

        // Planets still marked processing at this point reference a worker
        // that no longer tracks them; pull them back to the frontier.
        for mut planet in self.store.planets_with_status(PlanetStatus::Processing).await? {
            info!(planet_id = %planet.planet_id, "recovering planet stuck in processing");
            planet.status = if planet.error_retry_count > 0 {
                PlanetStatus::Error
            } else {
                PlanetStatus::Queued
            };
            planet.processing_server_id = None;
            planet.next_round_time = now;
            self.store.update_planet(&planet).await?;
            report.planets_recovered += 1;
        }

        // Rebuild the index wholesale; whatever it held before is untrusted.
        if let Err(e) = self.rebuild_index(&mut report).await {
            warn!(error = %e, "index rebuild failed, the health loop will repair it");
        }

        info!(
            workers_reset = report.workers_reset,
            planets_recovered = report.planets_recovered,
            planets_indexed = report.planets_indexed,
            "startup reconciliation complete"
        );

        Ok(report)
    }

    async fn rebuild_index(&self, report: &mut ReconcileReport) -> Result<()> {
        self.queue.clear().await?;
        for planet in self.store.schedulable_planets().await? {
            self.queue
                .put(&planet.planet_id, planet.next_round_time)
                .await?;
            report.planets_indexed += 1;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StartupReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupReconciler").finish_non_exhaustive()
    }
}
