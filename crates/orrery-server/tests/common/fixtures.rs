//! Test fixtures for orchestrator integration tests.

use chrono::{DateTime, Duration, Utc};

use orrery_state::{Planet, PlanetStatus, Worker, WorkerStatus};

/// Builder for planet records in arbitrary states.
pub struct PlanetBuilder {
    planet_id: String,
    season_id: i64,
    round_id: i64,
    next_round_time: DateTime<Utc>,
    status: PlanetStatus,
    processing_server_id: Option<String>,
    error_retry_count: i64,
}

impl PlanetBuilder {
    pub fn new(planet_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            planet_id: planet_id.to_string(),
            season_id: 1,
            round_id: 0,
            next_round_time: now,
            status: PlanetStatus::Queued,
            processing_server_id: None,
            error_retry_count: 0,
        }
    }

    pub fn with_season(mut self, season_id: i64) -> Self {
        self.season_id = season_id;
        self
    }

    pub fn with_round(mut self, round_id: i64) -> Self {
        self.round_id = round_id;
        self
    }

    pub fn due_at(mut self, due: DateTime<Utc>) -> Self {
        self.next_round_time = due;
        self
    }

    pub fn due_in(mut self, offset: Duration) -> Self {
        self.next_round_time += offset;
        self
    }

    pub fn processing_on(mut self, server_id: &str) -> Self {
        self.status = PlanetStatus::Processing;
        self.processing_server_id = Some(server_id.to_string());
        self
    }

    pub fn with_retries(mut self, count: i64) -> Self {
        self.error_retry_count = count;
        self
    }

    pub fn errored(mut self) -> Self {
        self.status = PlanetStatus::Error;
        self
    }

    pub fn build(self) -> Planet {
        Planet {
            planet_id: self.planet_id,
            season_id: self.season_id,
            round_id: self.round_id,
            current_round_number: 0,
            next_round_time: self.next_round_time,
            status: self.status,
            last_processed: None,
            processing_server_id: self.processing_server_id,
            error_retry_count: self.error_retry_count,
        }
    }
}

/// Builder for worker records in arbitrary states.
pub struct WorkerBuilder {
    server_id: String,
    status: WorkerStatus,
    last_heartbeat: DateTime<Utc>,
    current_task: Option<String>,
    total_completed: i64,
    connected_at: DateTime<Utc>,
}

impl WorkerBuilder {
    pub fn new(server_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            server_id: server_id.to_string(),
            status: WorkerStatus::Idle,
            last_heartbeat: now,
            current_task: None,
            total_completed: 0,
            connected_at: now,
        }
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn busy_with(mut self, planet_id: &str) -> Self {
        self.status = WorkerStatus::Busy;
        self.current_task = Some(planet_id.to_string());
        self
    }

    pub fn heartbeat_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat = at;
        self
    }

    pub fn with_completed(mut self, total: i64) -> Self {
        self.total_completed = total;
        self
    }

    pub fn connected_at(mut self, at: DateTime<Utc>) -> Self {
        self.connected_at = at;
        self
    }

    pub fn build(self) -> Worker {
        let mut worker = Worker::connected(&self.server_id, "unknown", self.connected_at);
        worker.status = self.status;
        worker.last_heartbeat = self.last_heartbeat;
        worker.current_task = self.current_task;
        worker.total_completed = self.total_completed;
        worker
    }
}
