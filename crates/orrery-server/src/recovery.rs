//! Orphaned-job release, shared by session teardown, the health loop, and
//! the startup reconciler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use orrery_state::{PendingQueue, PlanetStatus, Store, TaskStatus, Worker};

use crate::error::Result;

/// Releases the planet a worker was processing, if any.
///
/// The planet goes back to `queued` (or `error` if it still carries retries),
/// loses its worker reference, and is re-indexed; the open history row for
/// the attempt is closed as `timeout`. Returns the released planet id.
///
/// `due` overrides the re-index time; `None` keeps the planet's own
/// `next_round_time`. The caller is responsible for clearing the worker's
/// `current_task` and persisting the worker row, and for holding the
/// assignment lock so the release cannot interleave with a new assignment.
pub(crate) async fn release_orphaned_planet(
    store: &Arc<dyn Store>,
    queue: &Arc<dyn PendingQueue>,
    worker: &Worker,
    due: Option<DateTime<Utc>>,
    end_time: DateTime<Utc>,
    reason: &str,
) -> Result<Option<String>> {
    let Some(planet_id) = worker.current_task.clone() else {
        return Ok(None);
    };

    let Some(mut planet) = store.get_planet(&planet_id).await? else {
        warn!(planet_id, "orphaned task references a deleted planet");
        return Ok(None);
    };

    // The planet may already have been completed or reassigned; releasing it
    // then would clobber live state.
    if planet.processing_server_id.as_deref() != Some(worker.server_id.as_str()) {
        return Ok(None);
    }

    info!(
        planet_id,
        server_id = %worker.server_id,
        reason,
        "recovering orphaned job"
    );

    planet.status = if planet.error_retry_count > 0 {
        PlanetStatus::Error
    } else {
        PlanetStatus::Queued
    };
    planet.processing_server_id = None;
    if let Some(due) = due {
        planet.next_round_time = due;
    }
    store.update_planet(&planet).await?;

    if let Err(e) = queue.put(&planet_id, planet.next_round_time).await {
        warn!(planet_id, error = %e, "failed to re-index recovered planet");
    }

    if let Some(mut row) = store.open_history(&planet_id, &worker.server_id).await? {
        row.status = TaskStatus::Timeout;
        row.end_time = Some(end_time);
        row.error_message = Some(reason.to_owned());
        store.update_history(&row).await?;
    }

    Ok(Some(planet_id))
}
