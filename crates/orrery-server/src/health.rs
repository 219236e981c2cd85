//! The health loop: stale-heartbeat detection, orphan recovery, and index
//! drift repair.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing::{info, warn};

use orrery_state::{PendingQueue, PlanetStatus, Store, WorkerStatus};

use crate::assign::AssignmentEngine;
use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::error::Result;
use crate::recovery::release_orphaned_planet;
use crate::registry::SessionRegistry;

/// Periodic repair pass over workers, planets, and the pending-due index.
pub struct HealthMonitor {
    store: Arc<dyn Store>,
    queue: Arc<dyn PendingQueue>,
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    engine: Arc<AssignmentEngine>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn PendingQueue>,
        registry: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
        engine: Arc<AssignmentEngine>,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            clock,
            engine,
            config,
        }
    }

    /// Runs repair passes forever on the configured interval.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "health pass failed");
            }
        }
    }

    /// One repair pass: heartbeat ladder, orphaned planets, index drift,
    /// then an assignment nudge.
    pub async fn run_once(&self) -> Result<()> {
        self.check_heartbeats().await?;
        self.release_orphans().await?;
        self.reconcile_index().await?;
        self.engine.nudge();
        Ok(())
    }

    /// Walks workers with stale heartbeats: silence beyond `stale_after`
    /// marks them not_responding; beyond `offline_after` they go offline,
    /// lose their session, and any in-flight planet is released back to the
    /// frontier at the current time.
    async fn check_heartbeats(&self) -> Result<()> {
        let now = self.clock.now();
        let stale_cutoff = now - chrono_duration(self.config.stale_after);
        let stale = self.store.stale_workers(stale_cutoff).await?;

        for worker in stale {
            let _guard = self.engine.lock_assignments().await;

            // Re-read under the lock; a heartbeat may have landed meanwhile.
            let Some(mut worker) = self.store.get_worker(&worker.server_id).await? else {
                continue;
            };
            if worker.last_heartbeat >= stale_cutoff
                || worker.status == WorkerStatus::Offline
                || worker.status == WorkerStatus::NotInitialized
            {
                continue;
            }

            let silence = now - worker.last_heartbeat;
            if silence > chrono_duration(self.config.offline_after) {
                warn!(
                    server_id = %worker.server_id,
                    silence_secs = silence.num_seconds(),
                    "worker silent past the offline threshold, tearing down"
                );

                self.registry.detach_any(&worker.server_id);

                let released = release_orphaned_planet(
                    &self.store,
                    &self.queue,
                    &worker,
                    Some(now),
                    now,
                    "Server went offline during processing",
                )
                .await?;
                if released.is_some() {
                    worker.total_failed += 1;
                }

                worker.status = WorkerStatus::Offline;
                worker.current_task = None;
                worker.disconnected_at = Some(now);
                self.store.update_worker(&worker).await?;
            } else if worker.status != WorkerStatus::NotResponding {
                warn!(
                    server_id = %worker.server_id,
                    silence_secs = silence.num_seconds(),
                    "worker heartbeat stale, marking not_responding"
                );
                worker.status = WorkerStatus::NotResponding;
                self.store.update_worker(&worker).await?;
            }
        }

        Ok(())
    }

    /// Releases processing planets whose assigned worker is gone: deleted,
    /// offline, silent past the offline threshold, or no longer tracking
    /// the planet (a reconnect cleared its task).
    async fn release_orphans(&self) -> Result<()> {
        let now = self.clock.now();
        let processing = self.store.planets_with_status(PlanetStatus::Processing).await?;

        for planet in processing {
            let Some(server_id) = planet.processing_server_id.clone() else {
                // P1 violated; repair directly.
                let mut planet = planet;
                planet.status = if planet.error_retry_count > 0 {
                    PlanetStatus::Error
                } else {
                    PlanetStatus::Queued
                };
                planet.next_round_time = now;
                self.store.update_planet(&planet).await?;
                let _ = self.queue.put(&planet.planet_id, now).await;
                continue;
            };

            let worker = self.store.get_worker(&server_id).await?;
            let orphaned = match &worker {
                None => true,
                Some(w) => {
                    w.status == WorkerStatus::Offline
                        || w.current_task.as_deref() != Some(planet.planet_id.as_str())
                        || (w.status == WorkerStatus::NotResponding
                            && now - w.last_heartbeat
                                > chrono_duration(self.config.offline_after))
                }
            };

            if !orphaned {
                continue;
            }

            let _guard = self.engine.lock_assignments().await;

            // Re-read; a completion may have raced us here.
            let Some(fresh) = self.store.get_planet(&planet.planet_id).await? else {
                continue;
            };
            if fresh.status != PlanetStatus::Processing
                || fresh.processing_server_id.as_deref() != Some(server_id.as_str())
            {
                continue;
            }

            info!(planet_id = %fresh.planet_id, server_id, "releasing orphaned planet");

            let mut fresh = fresh;
            fresh.status = if fresh.error_retry_count > 0 {
                PlanetStatus::Error
            } else {
                PlanetStatus::Queued
            };
            fresh.processing_server_id = None;
            fresh.next_round_time = now;
            self.store.update_planet(&fresh).await?;

            if let Err(e) = self.queue.put(&fresh.planet_id, now).await {
                warn!(planet_id = %fresh.planet_id, error = %e, "failed to re-index orphan");
            }

            if let Some(mut row) = self.store.open_history(&fresh.planet_id, &server_id).await? {
                row.status = orrery_state::TaskStatus::Timeout;
                row.end_time = Some(now);
                row.error_message = Some("Server went offline during processing".to_owned());
                self.store.update_history(&row).await?;
            }

            if let Some(mut w) = worker {
                if w.current_task.as_deref() == Some(fresh.planet_id.as_str()) {
                    w.current_task = None;
                }
                w.total_failed += 1;
                self.store.update_worker(&w).await?;
            }
        }

        Ok(())
    }

    /// Repairs drift between the store and the index in both directions.
    /// Schedulable planets missing from the index are re-inserted at their
    /// own due time (this is also what resurrects retry-exhausted error
    /// planets); index members without an eligible planet are removed.
    async fn reconcile_index(&self) -> Result<()> {
        let eligible = self.store.schedulable_planets().await?;
        let indexed = match self.queue.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "index unavailable, skipping reconcile");
                return Ok(());
            }
        };

        let indexed_ids: HashSet<&str> = indexed.iter().map(|(id, _)| id.as_str()).collect();
        let eligible_ids: HashSet<&str> =
            eligible.iter().map(|p| p.planet_id.as_str()).collect();

        for planet in &eligible {
            if !indexed_ids.contains(planet.planet_id.as_str()) {
                info!(planet_id = %planet.planet_id, "re-indexing planet missing from index");
                if let Err(e) = self
                    .queue
                    .put(&planet.planet_id, planet.next_round_time)
                    .await
                {
                    warn!(planet_id = %planet.planet_id, error = %e, "failed to re-index planet");
                }
            }
        }

        for (planet_id, _) in &indexed {
            if !eligible_ids.contains(planet_id.as_str()) {
                info!(planet_id, "removing ineligible planet from index");
                if let Err(e) = self.queue.remove(planet_id).await {
                    warn!(planet_id, error = %e, "failed to remove index entry");
                }
            }
        }

        Ok(())
    }
}

fn chrono_duration(d: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::seconds(60))
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AssignmentConfig;
    use chrono::Utc;
    use orrery_state::{MemoryPendingQueue, MemoryStore, Planet, TaskHistory, TaskStatus, Worker};
    use tokio::sync::mpsc;

    struct Rig {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryPendingQueue>,
        registry: Arc<SessionRegistry>,
        clock: Arc<ManualClock>,
        monitor: HealthMonitor,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryPendingQueue::new());
        let registry = Arc::new(SessionRegistry::new());
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));
        let engine = Arc::new(AssignmentEngine::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            clock.clone(),
            AssignmentConfig::default(),
        ));
        let monitor = HealthMonitor::new(
            store.clone(),
            queue.clone(),
            registry.clone(),
            clock.clone(),
            engine,
            HealthConfig::default(),
        );
        Rig {
            store,
            queue,
            registry,
            clock,
            monitor,
        }
    }

    #[tokio::test]
    async fn stale_worker_becomes_not_responding() {
        let rig = rig();
        let now = rig.clock.now();

        let mut worker = Worker::connected("w1", "unknown", now);
        worker.status = WorkerStatus::Idle;
        worker.last_heartbeat = now - ChronoDuration::seconds(45);
        rig.store.upsert_worker(&worker).await.unwrap();

        rig.monitor.run_once().await.unwrap();

        let worker = rig.store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::NotResponding);
    }

    #[tokio::test]
    async fn fresh_worker_is_left_alone() {
        let rig = rig();
        let now = rig.clock.now();

        let mut worker = Worker::connected("w1", "unknown", now);
        worker.status = WorkerStatus::Idle;
        rig.store.upsert_worker(&worker).await.unwrap();

        rig.monitor.run_once().await.unwrap();

        let worker = rig.store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn silent_busy_worker_goes_offline_and_planet_is_released() {
        let rig = rig();
        let now = rig.clock.now();

        let mut planet = Planet::new("p1", 1, now - ChronoDuration::seconds(300));
        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some("w1".to_owned());
        rig.store.insert_planet(&planet).await.unwrap();

        let mut worker = Worker::connected("w1", "unknown", now - ChronoDuration::seconds(300));
        worker.status = WorkerStatus::Busy;
        worker.current_task = Some("p1".to_owned());
        worker.last_heartbeat = now - ChronoDuration::seconds(90);
        rig.store.upsert_worker(&worker).await.unwrap();

        let (tx, _rx) = mpsc::channel(4);
        rig.registry.attach("w1", tx, now);

        rig.store
            .insert_history(&TaskHistory::started("p1", "w1", now - ChronoDuration::seconds(90)))
            .await
            .unwrap();

        rig.monitor.run_once().await.unwrap();

        let worker = rig.store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        assert!(worker.current_task.is_none());
        assert!(worker.disconnected_at.is_some());
        assert_eq!(worker.total_failed, 1);
        assert!(!rig.registry.is_live("w1"));

        let planet = rig.store.get_planet("p1").await.unwrap().unwrap();
        assert_eq!(planet.status, PlanetStatus::Queued);
        assert!(planet.processing_server_id.is_none());
        assert_eq!(planet.next_round_time, now);

        let entries = rig.queue.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "p1");

        let rows = rig.store.history_rows().await;
        assert_eq!(rows[0].status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn planet_held_by_offline_worker_is_released() {
        let rig = rig();
        let now = rig.clock.now();

        let mut planet = Planet::new("p1", 1, now - ChronoDuration::seconds(300));
        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some("w1".to_owned());
        rig.store.insert_planet(&planet).await.unwrap();

        // Worker already offline (its session died some other way).
        let mut worker = Worker::connected("w1", "unknown", now - ChronoDuration::seconds(300));
        worker.status = WorkerStatus::Offline;
        worker.current_task = Some("p1".to_owned());
        worker.last_heartbeat = now - ChronoDuration::seconds(600);
        rig.store.upsert_worker(&worker).await.unwrap();

        rig.monitor.run_once().await.unwrap();

        let planet = rig.store.get_planet("p1").await.unwrap().unwrap();
        assert_eq!(planet.status, PlanetStatus::Queued);
        assert!(planet.processing_server_id.is_none());

        let worker = rig.store.get_worker("w1").await.unwrap().unwrap();
        assert!(worker.current_task.is_none());
        assert_eq!(worker.total_failed, 1);
    }

    #[tokio::test]
    async fn planet_orphaned_by_reconnect_is_released() {
        let rig = rig();
        let now = rig.clock.now();

        let mut planet = Planet::new("p1", 1, now);
        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some("w1".to_owned());
        rig.store.insert_planet(&planet).await.unwrap();

        // Reconnect wiped the worker's task reference.
        let mut worker = Worker::connected("w1", "unknown", now);
        worker.status = WorkerStatus::Idle;
        worker.current_task = None;
        rig.store.upsert_worker(&worker).await.unwrap();

        rig.monitor.run_once().await.unwrap();

        let planet = rig.store.get_planet("p1").await.unwrap().unwrap();
        assert_eq!(planet.status, PlanetStatus::Queued);
    }

    #[tokio::test]
    async fn drift_repair_reinserts_and_removes() {
        let rig = rig();
        let now = rig.clock.now();

        // Queued planet missing from the index.
        let queued = Planet::new("missing", 1, now);
        rig.store.insert_planet(&queued).await.unwrap();

        // Error planet missing from the index (retry-exhausted recovery).
        let mut errored = Planet::new("errored", 1, now + ChronoDuration::seconds(30));
        errored.status = PlanetStatus::Error;
        rig.store.insert_planet(&errored).await.unwrap();

        // Index entry without an eligible planet behind it.
        rig.queue.put("ghost", now).await.unwrap();

        rig.monitor.run_once().await.unwrap();

        let entries = rig.queue.entries().await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        assert!(ids.contains(&"missing"));
        assert!(ids.contains(&"errored"));
        assert!(!ids.contains(&"ghost"));
    }

    #[tokio::test]
    async fn processing_planet_is_removed_from_index() {
        let rig = rig();
        let now = rig.clock.now();

        let mut planet = Planet::new("p1", 1, now);
        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some("w1".to_owned());
        rig.store.insert_planet(&planet).await.unwrap();

        let mut worker = Worker::connected("w1", "unknown", now);
        worker.status = WorkerStatus::Busy;
        worker.current_task = Some("p1".to_owned());
        rig.store.upsert_worker(&worker).await.unwrap();

        // Stale index entry left behind by a failed remove.
        rig.queue.put("p1", now).await.unwrap();

        rig.monitor.run_once().await.unwrap();

        assert_eq!(rig.queue.size().await.unwrap(), 0);
        let planet = rig.store.get_planet("p1").await.unwrap().unwrap();
        assert_eq!(planet.status, PlanetStatus::Processing);
    }
}
