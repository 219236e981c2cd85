//! Wire protocol for the orrery worker channel.
//!
//! Workers hold one persistent WebSocket per node and exchange UTF-8 JSON
//! frames with the orchestrator. Every frame is an object with a required
//! `"type"` discriminator:
//!
//! - **Worker → Orchestrator**: heartbeats, status updates, job results,
//!   graceful disconnect ([`InboundFrame`])
//! - **Orchestrator → Worker**: job assignments, admin commands, heartbeat
//!   acknowledgements ([`OutboundFrame`])
//!
//! Legacy clients are still mid-migration on two field names; the inbound
//! types accept `map_id` for `planet_id` and `next_calculation_time` for
//! `next_round_time`, while serialization always emits the preferred names.

pub mod error;
pub mod frames;
pub mod ident;

pub use error::ProtoError;
pub use frames::{
    Heartbeat, InboundFrame, JobDone, JobError, JobSkipped, OutboundFrame, ReportedStatus,
    StatusUpdate,
};
pub use ident::{server_ip_from_id, validate_planet_id, MAX_ID_LEN};
