//! Frame catalog for the worker channel.
//!
//! Frames are tagged on `"type"`. Unknown inbound types deserialize to
//! [`InboundFrame::Unknown`] so a newer worker talking to an older
//! orchestrator degrades to a logged warning rather than a dropped session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Frames received from a worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Periodic liveness report with resource gauges.
    Heartbeat(Heartbeat),
    /// Worker-reported status transition.
    StatusUpdate(StatusUpdate),
    /// Successful round calculation.
    JobDone(JobDone),
    /// Round intentionally not calculated; re-queue without completion credit.
    JobSkipped(JobSkipped),
    /// Round calculation failed.
    Error(JobError),
    /// Graceful shutdown notice sent before the worker closes the channel.
    Disconnect,
    /// Any unrecognised `type` value.
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Parses a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(text).map_err(|e| ProtoError::MalformedFrame(e.to_string()))
    }
}

/// Resource gauges carried by a heartbeat. All optional; absent gauges
/// leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Heartbeat {
    pub idle_cpu: Option<f64>,
    pub max_cpu: Option<f64>,
    pub idle_ram: Option<f64>,
    pub max_ram: Option<f64>,
    pub disk: Option<f64>,
}

/// Worker-reported status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdate {
    pub status: ReportedStatus,
}

/// The subset of worker states a worker may report about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Idle,
    Busy,
    NotInitialized,
}

/// Successful completion report.
///
/// The worker is the authoritative source for game state: when it supplies
/// `season_id`, `round_id`, or `round_number`, those values replace the
/// orchestrator's bookkeeping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobDone {
    #[serde(alias = "map_id")]
    pub planet_id: String,
    #[serde(alias = "next_calculation_time")]
    pub next_round_time: DateTime<Utc>,
    pub season_id: Option<i64>,
    pub round_id: Option<i64>,
    pub round_number: Option<i64>,
}

/// Skip report: the round was not calculated and should be retried at the
/// supplied time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobSkipped {
    #[serde(alias = "map_id")]
    pub planet_id: String,
    #[serde(alias = "next_calculation_time")]
    pub next_round_time: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Failure report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobError {
    #[serde(alias = "map_id")]
    pub planet_id: Option<String>,
    pub error: Option<String>,
}

impl JobError {
    /// The error message, substituting a placeholder when the worker sent none.
    #[must_use]
    pub fn message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

/// Frames sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Hand a planet round calculation to the worker.
    AssignJob {
        planet_id: String,
        season_id: i64,
        round_id: i64,
    },
    /// Administrative command forwarded from the HTTP surface.
    Command {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },
    /// Heartbeat acknowledgement.
    Pong { server_time: DateTime<Utc> },
}

impl OutboundFrame {
    /// Serializes the frame to its wire form.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Serialisation(e.to_string()))
    }
}
