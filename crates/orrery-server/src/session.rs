//! Worker sessions: one WebSocket per node.
//!
//! The session task owns both directions of the channel: a `select!` loop
//! reads inbound frames and drains the bounded outbound queue other
//! components write into via the registry. Malformed inbound closes the
//! session (protocol violation); unknown frame types are logged and ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use orrery_proto::{
    server_ip_from_id, Heartbeat, InboundFrame, OutboundFrame, ReportedStatus, StatusUpdate,
};
use orrery_state::{Store, Worker, WorkerStatus};

use crate::api::AppState;
use crate::clock::Clock;
use crate::error::Result;
use crate::recovery::release_orphaned_planet;

/// Upgrade handler for `/ws/server/{server_id}/`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Response {
    debug!(server_id, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_session(socket, state, server_id))
}

async fn handle_session(mut socket: WebSocket, state: Arc<AppState>, server_id: String) {
    if let Err(e) = register_worker(&state, &server_id).await {
        error!(server_id, error = %e, "failed to register worker, dropping connection");
        return;
    }

    let (tx, mut rx) = mpsc::channel::<OutboundFrame>(state.session_queue_capacity);
    let epoch = state.registry.attach(&server_id, tx.clone(), state.clock.now());
    info!(server_id, "worker connected");

    let mut graceful = false;

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match InboundFrame::parse(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(server_id, error = %e, "malformed frame, closing session");
                                break;
                            }
                        };

                        if let SessionFlow::Close { graceful: g } =
                            dispatch(&state, &server_id, &tx, frame).await
                        {
                            graceful = g;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(server_id, error = %e, "socket error");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        let text = match frame.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                error!(server_id, error = %e, "failed to serialize outbound frame");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    teardown(&state, &server_id, epoch, graceful).await;
}

enum SessionFlow {
    Continue,
    Close { graceful: bool },
}

async fn dispatch(
    state: &Arc<AppState>,
    server_id: &str,
    tx: &mpsc::Sender<OutboundFrame>,
    frame: InboundFrame,
) -> SessionFlow {
    match frame {
        InboundFrame::Heartbeat(hb) => {
            if let Err(e) = apply_heartbeat(state, server_id, &hb).await {
                error!(server_id, error = %e, "heartbeat update failed");
            }
            // Acknowledge so the worker can watch round-trip liveness.
            let _ = tx.try_send(OutboundFrame::Pong {
                server_time: state.clock.now(),
            });
        }
        InboundFrame::StatusUpdate(update) => {
            if let Err(e) = apply_status_update(state, server_id, &update).await {
                error!(server_id, error = %e, "status update failed");
            }
        }
        InboundFrame::JobDone(done) => {
            if let Err(e) = state.completion.handle_job_done(server_id, done).await {
                error!(server_id, error = %e, "job_done handling failed");
            }
        }
        InboundFrame::JobSkipped(skipped) => {
            if let Err(e) = state.completion.handle_job_skipped(server_id, skipped).await {
                error!(server_id, error = %e, "job_skipped handling failed");
            }
        }
        InboundFrame::Error(report) => {
            if let Err(e) = state.completion.handle_job_error(server_id, report).await {
                error!(server_id, error = %e, "error handling failed");
            }
        }
        InboundFrame::Disconnect => {
            info!(server_id, "worker disconnecting gracefully");
            return SessionFlow::Close { graceful: true };
        }
        InboundFrame::Unknown => {
            warn!(server_id, "unknown frame type, ignoring");
        }
    }

    SessionFlow::Continue
}

/// Creates or refreshes the worker record for a (re)connecting node.
///
/// A reconnect resets the worker to not_initialized with no task; the node
/// is expected to report `status_update: idle` once its systems are loaded,
/// and any in-flight planet from the prior session is reclaimed by the
/// health loop.
pub(crate) async fn register_worker(state: &Arc<AppState>, server_id: &str) -> Result<()> {
    let now = state.clock.now();

    let worker = match state.store.get_worker(server_id).await? {
        Some(mut existing) => {
            existing.server_ip = server_ip_from_id(server_id);
            existing.status = WorkerStatus::NotInitialized;
            existing.current_task = None;
            existing.last_heartbeat = now;
            existing.connected_at = now;
            existing.disconnected_at = None;
            existing
        }
        None => Worker::connected(server_id, server_ip_from_id(server_id), now),
    };

    state.store.upsert_worker(&worker).await?;
    info!(server_id, server_ip = %worker.server_ip, "worker registered");
    Ok(())
}

/// Applies a heartbeat: gauges present in the frame plus the timestamp.
/// Never changes the worker's status.
pub(crate) async fn apply_heartbeat(
    state: &Arc<AppState>,
    server_id: &str,
    hb: &Heartbeat,
) -> Result<()> {
    let Some(mut worker) = state.store.get_worker(server_id).await? else {
        warn!(server_id, "heartbeat from unregistered worker");
        return Ok(());
    };

    if let Some(v) = hb.idle_cpu {
        worker.idle_cpu = v;
    }
    if let Some(v) = hb.max_cpu {
        worker.max_cpu = v;
    }
    if let Some(v) = hb.idle_ram {
        worker.idle_ram = v;
    }
    if let Some(v) = hb.max_ram {
        worker.max_ram = v;
    }
    if let Some(v) = hb.disk {
        worker.disk = v;
    }
    worker.last_heartbeat = state.clock.now();

    state.store.update_worker(&worker).await?;
    Ok(())
}

/// Applies a worker-reported status transition. Reporting idle fires the
/// assignment nudge so a freed worker gets work without waiting for a tick.
pub(crate) async fn apply_status_update(
    state: &Arc<AppState>,
    server_id: &str,
    update: &StatusUpdate,
) -> Result<()> {
    let Some(mut worker) = state.store.get_worker(server_id).await? else {
        warn!(server_id, "status update from unregistered worker");
        return Ok(());
    };

    worker.status = match update.status {
        ReportedStatus::Idle => WorkerStatus::Idle,
        ReportedStatus::Busy => WorkerStatus::Busy,
        ReportedStatus::NotInitialized => WorkerStatus::NotInitialized,
    };
    state.store.update_worker(&worker).await?;
    info!(server_id, status = worker.status.as_str(), "worker status updated");

    if worker.status == WorkerStatus::Idle {
        state.engine.nudge();
    }

    Ok(())
}

/// Marks the worker offline and reclaims its in-flight planet, but only if
/// this session still owns the registry slot (a reconnect may already have
/// replaced it).
async fn teardown(state: &Arc<AppState>, server_id: &str, epoch: u64, graceful: bool) {
    if !state.registry.detach(server_id, epoch) {
        debug!(server_id, "session already replaced, skipping offline mark");
        return;
    }

    let _guard = state.engine.lock_assignments().await;
    let now = state.clock.now();

    match state.store.get_worker(server_id).await {
        Ok(Some(mut worker)) => {
            if let Err(e) = release_orphaned_planet(
                &state.store,
                &state.queue,
                &worker,
                None,
                now,
                "WebSocket disconnect",
            )
            .await
            {
                error!(server_id, error = %e, "orphan recovery on disconnect failed");
            }

            worker.status = WorkerStatus::Offline;
            worker.current_task = None;
            worker.disconnected_at = Some(now);
            if let Err(e) = state.store.update_worker(&worker).await {
                error!(server_id, error = %e, "failed to mark worker offline");
            }
        }
        Ok(None) => {}
        Err(e) => error!(server_id, error = %e, "failed to load worker during teardown"),
    }

    info!(server_id, graceful, "worker disconnected");
}
