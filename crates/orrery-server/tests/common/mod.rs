//! Shared harness for orchestrator integration tests.
#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use orrery_proto::OutboundFrame;
use orrery_server::{
    AppState, AssignmentConfig, AssignmentEngine, Clock, CompletionHandler, HealthConfig,
    HealthMonitor, ManualClock, RetryConfig, SessionRegistry, StartupReconciler,
};
use orrery_state::{
    MemoryPendingQueue, MemoryStore, PendingQueue, Planet, Store, Worker, WorkerStatus,
};

/// A full orchestrator core wired to memory backends and a manual clock.
pub struct TestOrchestrator {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryPendingQueue>,
    pub registry: Arc<SessionRegistry>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<AssignmentEngine>,
    pub completion: Arc<CompletionHandler>,
    pub health: Arc<HealthMonitor>,
    pub reconciler: StartupReconciler,
    pub state: Arc<AppState>,
}

impl TestOrchestrator {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryPendingQueue::new());
        let registry = Arc::new(SessionRegistry::new());
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));

        let store_dyn: Arc<dyn Store> = store.clone();
        let queue_dyn: Arc<dyn PendingQueue> = queue.clone();
        let clock_dyn: Arc<dyn Clock> = clock.clone();

        let engine = Arc::new(AssignmentEngine::new(
            store_dyn.clone(),
            queue_dyn.clone(),
            registry.clone(),
            clock_dyn.clone(),
            AssignmentConfig::default(),
        ));
        let completion = Arc::new(CompletionHandler::new(
            store_dyn.clone(),
            queue_dyn.clone(),
            clock_dyn.clone(),
            engine.clone(),
            RetryConfig::default(),
        ));
        let health = Arc::new(HealthMonitor::new(
            store_dyn.clone(),
            queue_dyn.clone(),
            registry.clone(),
            clock_dyn.clone(),
            engine.clone(),
            HealthConfig::default(),
        ));
        let reconciler =
            StartupReconciler::new(store_dyn.clone(), queue_dyn.clone(), clock_dyn.clone());

        let state = Arc::new(AppState {
            store: store_dyn,
            queue: queue_dyn,
            registry: registry.clone(),
            engine: engine.clone(),
            completion: completion.clone(),
            clock: clock_dyn,
            session_queue_capacity: 32,
        });

        Self {
            store,
            queue,
            registry,
            clock,
            engine,
            completion,
            health,
            reconciler,
            state,
        }
    }

    /// Creates a planet the way the HTTP surface does: stored and indexed
    /// as immediately due.
    pub async fn create_planet(&self, planet_id: &str, season_id: i64) -> Planet {
        let planet = Planet::new(planet_id, season_id, self.clock.now());
        self.store.insert_planet(&planet).await.unwrap();
        self.queue
            .put(planet_id, planet.next_round_time)
            .await
            .unwrap();
        planet
    }

    /// Registers an idle worker with a live session and returns the
    /// receiving end of its outbound queue.
    pub async fn connect_idle_worker(&self, server_id: &str) -> mpsc::Receiver<OutboundFrame> {
        let mut worker = Worker::connected(server_id, "unknown", self.clock.now());
        worker.status = WorkerStatus::Idle;
        self.store.upsert_worker(&worker).await.unwrap();

        let (tx, rx) = mpsc::channel(32);
        self.registry.attach(server_id, tx, self.clock.now());
        rx
    }

    /// Refreshes a worker's heartbeat to the current manual-clock time.
    pub async fn beat(&self, server_id: &str) {
        let mut worker = self.store.get_worker(server_id).await.unwrap().unwrap();
        worker.last_heartbeat = self.clock.now();
        self.store.update_worker(&worker).await.unwrap();
    }
}

impl Default for TestOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}
