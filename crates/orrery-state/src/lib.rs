//! Storage backends for the orrery orchestrator.
//!
//! Two concerns live here, each behind an async trait with a production and
//! an in-memory implementation:
//!
//! - [`Store`]: the durable record of planets, workers, and task history.
//!   PostgreSQL in production, `HashMap`s for tests. The store is the single
//!   source of truth.
//! - [`PendingQueue`]: the time-ordered dispatch frontier, a sorted set of
//!   `planet_id → next_round_time`. Valkey/Redis in production, in-memory for
//!   tests. The queue is a best-effort cache over planet rows; if it drifts
//!   or is lost entirely, the health loop and startup reconciler rebuild it
//!   from the store.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod store;
pub mod types;
pub mod valkey;

pub use error::{QueueError, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use queue::{MemoryPendingQueue, PendingQueue};
pub use store::Store;
pub use types::{Planet, PlanetStatus, TaskHistory, TaskStatus, Worker, WorkerStatus};
pub use valkey::ValkeyPendingQueue;
