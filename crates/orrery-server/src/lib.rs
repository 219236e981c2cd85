//! Orrery: a server-orchestration core for periodic planet calculations.
//!
//! Worker nodes (game servers) hold a persistent WebSocket each, advertise
//! liveness and resource metrics, receive round-calculation assignments, and
//! report completion or failure. The orchestrator is the single source of
//! truth for which planets exist, when each is due, which worker owns which
//! job, and the history of every attempt.
//!
//! # Architecture
//!
//! Four cooperating pieces implement race-free, time-driven dispatch:
//!
//! - **Pending-due index** (`orrery-state`): a sorted set of
//!   `planet_id → due_time`, the dispatch frontier.
//! - **[`AssignmentEngine`]**: pairs due planets with idle workers under a
//!   single assignment lock, so no planet is dispatched twice and no worker
//!   holds two jobs.
//! - **Session layer** ([`session`]): one task per connected worker, parsing
//!   inbound frames and draining a bounded outbound queue.
//! - **[`HealthMonitor`] + [`StartupReconciler`]**: stale-heartbeat
//!   detection, orphan recovery, bounded retry with exponential backoff, and
//!   index drift repair.
//!
//! Dispatch is tick-driven with event nudges layered on top: the periodic
//! tick guarantees progress even if every signal is lost, while "worker
//! became idle" nudges keep latency low.

pub mod api;
pub mod assign;
pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod health;
pub mod reconcile;
mod recovery;
pub mod registry;
pub mod session;

pub use api::AppState;
pub use assign::AssignmentEngine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::CompletionHandler;
pub use config::{
    ApiConfig, AssignmentConfig, DatabaseConfig, HealthConfig, OrchestratorConfig, RetryConfig,
    ValkeyConfig,
};
pub use error::{OrchestratorError, Result};
pub use health::HealthMonitor;
pub use reconcile::{ReconcileReport, StartupReconciler};
pub use registry::{SessionHandle, SessionRegistry};
