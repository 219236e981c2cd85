//! In-memory registry of live worker sessions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use orrery_proto::OutboundFrame;

/// Handle to one live session: the outbound frame queue plus attachment
/// metadata.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<OutboundFrame>,
    /// When this session attached.
    pub connected_at: DateTime<Utc>,
    epoch: u64,
}

impl SessionHandle {
    /// Queues a frame without waiting. Fails when the queue is full or the
    /// session is tearing down; callers treat both as "worker unavailable".
    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), TrySendError<OutboundFrame>> {
        self.outbound.try_send(frame)
    }

    /// Queues a frame, waiting for space. Returns false once the session has
    /// closed its receiver.
    pub async fn send(&self, frame: OutboundFrame) -> bool {
        self.outbound.send(frame).await.is_ok()
    }
}

/// Thread-safe map of `server_id → SessionHandle`.
///
/// Re-attachment replaces the prior session; each attachment gets a fresh
/// epoch so a superseded session's cleanup cannot tear down its replacement.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    next_epoch: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a session, replacing any existing one for the same worker.
    /// Returns the epoch the caller must present to [`detach`](Self::detach).
    pub fn attach(
        &self,
        server_id: &str,
        outbound: mpsc::Sender<OutboundFrame>,
        connected_at: DateTime<Utc>,
    ) -> u64 {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let replaced = self
            .sessions
            .insert(
                server_id.to_owned(),
                SessionHandle {
                    outbound,
                    connected_at,
                    epoch,
                },
            )
            .is_some();

        if replaced {
            tracing::info!(server_id, "session re-attached, replacing prior channel");
        }

        epoch
    }

    /// Detaches a session if it still owns the slot. Returns false when a
    /// newer session has already replaced it.
    pub fn detach(&self, server_id: &str, epoch: u64) -> bool {
        self.sessions
            .remove_if(server_id, |_, handle| handle.epoch == epoch)
            .is_some()
    }

    /// Unconditionally removes a worker's session. Health-loop teardown.
    pub fn detach_any(&self, server_id: &str) {
        self.sessions.remove(server_id);
    }

    pub fn get(&self, server_id: &str) -> Option<SessionHandle> {
        self.sessions.get(server_id).map(|r| r.clone())
    }

    /// True when the worker has a live session.
    pub fn is_live(&self, server_id: &str) -> bool {
        self.sessions.contains_key(server_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
