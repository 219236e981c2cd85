use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{Planet, PlanetStatus, TaskHistory, TaskStatus, Worker, WorkerStatus};

#[derive(Debug, Default)]
struct HistoryTable {
    rows: Vec<TaskHistory>,
    next_id: i64,
}

/// In-memory store used by tests and as a zero-dependency fallback.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    planets: Arc<RwLock<HashMap<String, Planet>>>,
    workers: Arc<RwLock<HashMap<String, Worker>>>,
    history: Arc<RwLock<HistoryTable>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All history rows, newest first. Test-side inspection helper.
    pub async fn history_rows(&self) -> Vec<TaskHistory> {
        let table = self.history.read().await;
        let mut rows = table.rows.clone();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        rows
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_planet(&self, planet: &Planet) -> Result<(), StoreError> {
        let mut planets = self.planets.write().await;
        if planets.contains_key(&planet.planet_id) {
            return Err(StoreError::AlreadyExists(planet.planet_id.clone()));
        }
        planets.insert(planet.planet_id.clone(), planet.clone());
        Ok(())
    }

    async fn get_planet(&self, planet_id: &str) -> Result<Option<Planet>, StoreError> {
        let planets = self.planets.read().await;
        Ok(planets.get(planet_id).cloned())
    }

    async fn update_planet(&self, planet: &Planet) -> Result<(), StoreError> {
        let mut planets = self.planets.write().await;
        match planets.get_mut(&planet.planet_id) {
            Some(existing) => {
                *existing = planet.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(planet.planet_id.clone())),
        }
    }

    async fn delete_planet(&self, planet_id: &str) -> Result<bool, StoreError> {
        let mut planets = self.planets.write().await;
        let removed = planets.remove(planet_id).is_some();
        if removed {
            let mut table = self.history.write().await;
            table.rows.retain(|row| row.planet_id != planet_id);
        }
        Ok(removed)
    }

    async fn planets_with_status(
        &self,
        status: PlanetStatus,
    ) -> Result<Vec<Planet>, StoreError> {
        let planets = self.planets.read().await;
        let mut matching: Vec<Planet> = planets
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.next_round_time.cmp(&b.next_round_time));
        Ok(matching)
    }

    async fn count_planets_with_status(
        &self,
        status: PlanetStatus,
    ) -> Result<u64, StoreError> {
        let planets = self.planets.read().await;
        Ok(planets.values().filter(|p| p.status == status).count() as u64)
    }

    async fn due_queued_planets(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Planet>, StoreError> {
        let planets = self.planets.read().await;
        let mut due: Vec<Planet> = planets
            .values()
            .filter(|p| p.status == PlanetStatus::Queued && p.next_round_time <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_round_time.cmp(&b.next_round_time));
        due.truncate(limit);
        Ok(due)
    }

    async fn schedulable_planets(&self) -> Result<Vec<Planet>, StoreError> {
        let planets = self.planets.read().await;
        let mut matching: Vec<Planet> = planets
            .values()
            .filter(|p| p.is_schedulable())
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.next_round_time.cmp(&b.next_round_time));
        Ok(matching)
    }

    async fn upsert_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        let mut workers = self.workers.write().await;
        workers.insert(worker.server_id.clone(), worker.clone());
        Ok(())
    }

    async fn get_worker(&self, server_id: &str) -> Result<Option<Worker>, StoreError> {
        let workers = self.workers.read().await;
        Ok(workers.get(server_id).cloned())
    }

    async fn update_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        let mut workers = self.workers.write().await;
        match workers.get_mut(&worker.server_id) {
            Some(existing) => {
                *existing = worker.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(worker.server_id.clone())),
        }
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        let workers = self.workers.read().await;
        let mut all: Vec<Worker> = workers.values().cloned().collect();
        all.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        Ok(all)
    }

    async fn workers_with_status(
        &self,
        status: WorkerStatus,
    ) -> Result<Vec<Worker>, StoreError> {
        let workers = self.workers.read().await;
        let mut matching: Vec<Worker> = workers
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        Ok(matching)
    }

    async fn count_workers_with_status(
        &self,
        status: WorkerStatus,
    ) -> Result<u64, StoreError> {
        let workers = self.workers.read().await;
        Ok(workers.values().filter(|w| w.status == status).count() as u64)
    }

    async fn idle_workers(&self, limit: usize) -> Result<Vec<Worker>, StoreError> {
        let workers = self.workers.read().await;
        let mut idle: Vec<Worker> = workers
            .values()
            .filter(|w| w.status == WorkerStatus::Idle)
            .cloned()
            .collect();
        idle.sort_by(|a, b| {
            a.total_completed
                .cmp(&b.total_completed)
                .then(a.connected_at.cmp(&b.connected_at))
        });
        idle.truncate(limit);
        Ok(idle)
    }

    async fn stale_workers(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>, StoreError> {
        let workers = self.workers.read().await;
        Ok(workers
            .values()
            .filter(|w| {
                matches!(
                    w.status,
                    WorkerStatus::Idle | WorkerStatus::Busy | WorkerStatus::NotResponding
                ) && w.last_heartbeat < cutoff
            })
            .cloned()
            .collect())
    }

    async fn insert_history(&self, history: &TaskHistory) -> Result<i64, StoreError> {
        let mut table = self.history.write().await;
        table.next_id += 1;
        let id = table.next_id;
        let mut row = history.clone();
        row.id = id;
        table.rows.push(row);
        Ok(id)
    }

    async fn update_history(&self, history: &TaskHistory) -> Result<(), StoreError> {
        let mut table = self.history.write().await;
        match table.rows.iter_mut().find(|row| row.id == history.id) {
            Some(row) => {
                *row = history.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("history {}", history.id))),
        }
    }

    async fn open_history(
        &self,
        planet_id: &str,
        server_id: &str,
    ) -> Result<Option<TaskHistory>, StoreError> {
        let table = self.history.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|row| {
                row.planet_id == planet_id
                    && row.server_id == server_id
                    && row.status == TaskStatus::Started
            })
            .max_by_key(|row| (row.start_time, row.id))
            .cloned())
    }

    async fn latest_failed_history(
        &self,
        planet_id: &str,
    ) -> Result<Option<TaskHistory>, StoreError> {
        let table = self.history.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|row| row.planet_id == planet_id && row.status == TaskStatus::Failed)
            .max_by_key(|row| (row.start_time, row.id))
            .cloned())
    }
}
