//! Records for the three persisted tables and their status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A planet: one unit of periodic work.
///
/// Planets progress through rounds. `next_round_time` drives scheduling; a
/// planet is *due* once it is less than or equal to the current time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Planet {
    pub planet_id: String,
    pub season_id: i64,
    pub round_id: i64,
    pub current_round_number: i64,
    pub next_round_time: DateTime<Utc>,
    pub status: PlanetStatus,
    pub last_processed: Option<DateTime<Utc>>,
    /// Set iff `status == Processing`.
    pub processing_server_id: Option<String>,
    /// Consecutive failures; reset to zero on success.
    pub error_retry_count: i64,
}

impl Planet {
    /// Creates a new planet due immediately.
    #[must_use]
    pub fn new(planet_id: impl Into<String>, season_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            planet_id: planet_id.into(),
            season_id,
            round_id: 0,
            current_round_number: 0,
            next_round_time: now,
            status: PlanetStatus::Queued,
            last_processed: None,
            processing_server_id: None,
            error_retry_count: 0,
        }
    }

    /// True when the planet belongs in the pending-due index.
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        matches!(self.status, PlanetStatus::Queued | PlanetStatus::Error)
    }
}

/// Planet processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanetStatus {
    /// Waiting for its next round; present in the pending-due index.
    Queued,
    /// Assigned to a worker.
    Processing,
    /// Last attempt failed; indexed for a backoff retry.
    Error,
}

impl PlanetStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A worker node: processes one planet at a time over a persistent channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub server_id: String,
    pub server_ip: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub idle_cpu: f64,
    pub max_cpu: f64,
    pub idle_ram: f64,
    pub max_ram: f64,
    pub disk: f64,
    /// Set iff `status == Busy`.
    pub current_task: Option<String>,
    pub total_assigned: i64,
    pub total_completed: i64,
    pub total_failed: i64,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Worker {
    /// Creates a fresh worker record for a new connection.
    #[must_use]
    pub fn connected(
        server_id: impl Into<String>,
        server_ip: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            server_ip: server_ip.into(),
            status: WorkerStatus::NotInitialized,
            last_heartbeat: now,
            idle_cpu: 0.0,
            max_cpu: 0.0,
            idle_ram: 0.0,
            max_ram: 0.0,
            disk: 0.0,
            current_task: None,
            total_assigned: 0,
            total_completed: 0,
            total_failed: 0,
            connected_at: now,
            disconnected_at: None,
        }
    }
}

/// Worker operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// No live channel.
    Offline,
    /// Connected, but has not yet reported ready.
    NotInitialized,
    /// Connected and ready for work.
    Idle,
    /// Processing a planet.
    Busy,
    /// Connected but heartbeats have gone stale.
    NotResponding,
}

impl WorkerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::NotInitialized => "not_initialized",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::NotResponding => "not_responding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "offline" => Some(Self::Offline),
            "not_initialized" => Some(Self::NotInitialized),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "not_responding" => Some(Self::NotResponding),
            _ => None,
        }
    }
}

/// Audit row for one job attempt.
///
/// Retries of a failing planet reuse the same row, so history stays bounded
/// even under a retry storm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistory {
    /// Surrogate key; zero until the row has been inserted.
    pub id: i64,
    pub planet_id: String,
    pub server_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl TaskHistory {
    /// Creates an open `started` row for a fresh assignment.
    #[must_use]
    pub fn started(
        planet_id: impl Into<String>,
        server_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            planet_id: planet_id.into(),
            server_id: server_id.into(),
            start_time: now,
            end_time: None,
            status: TaskStatus::Started,
            error_message: None,
            duration_seconds: None,
        }
    }
}

/// Outcome of a job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    Completed,
    Failed,
    /// The worker went offline mid-job.
    Timeout,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}
