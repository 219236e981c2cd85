//! Admin HTTP surface: a thin adapter over the core's public operations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use orrery_proto::{validate_planet_id, JobDone, OutboundFrame};
use orrery_state::{PendingQueue, Planet, PlanetStatus, Store, StoreError, WorkerStatus};

use crate::assign::AssignmentEngine;
use crate::clock::Clock;
use crate::completion::CompletionHandler;
use crate::registry::SessionRegistry;
use crate::session;

/// Shared application state.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn PendingQueue>,
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<AssignmentEngine>,
    pub completion: Arc<CompletionHandler>,
    pub clock: Arc<dyn Clock>,
    /// Capacity of each session's outbound frame queue.
    pub session_queue_capacity: usize,
}

/// Creates the router: the admin API plus the worker channel endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(health_check))
        // Worker channel
        .route("/ws/server/{server_id}/", get(session::ws_handler))
        // Planet management
        .route("/planet/create", post(create_planet))
        .route("/planet/{planet_id}", get(get_planet))
        .route("/planet/remove/{planet_id}", delete(remove_planet))
        // Job results (HTTP fallback for the job_done frame)
        .route("/result", post(submit_result))
        // Administrative actions
        .route("/force-assign", post(force_assign))
        .route("/command", post(send_command))
        // Monitoring
        .route("/queue", get(queue_status))
        .route("/servers", get(list_servers))
        .route("/server/{server_id}", get(server_detail))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// Creates a planet and indexes it as immediately due.
async fn create_planet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePlanetRequest>,
) -> Response {
    let Some(planet_id) = req.planet_id.or(req.map_id) else {
        return bad_request("planet_id (or map_id) is required");
    };

    if let Err(e) = validate_planet_id(&planet_id) {
        return bad_request(&e.to_string());
    }

    let Some(season_id) = req.season_id else {
        return bad_request("season_id is required");
    };

    let mut planet = Planet::new(planet_id, season_id, state.clock.now());
    if let Some(round_id) = req.round_id {
        planet.round_id = round_id;
    }
    if let Some(round_number) = req.current_round_number {
        planet.current_round_number = round_number;
    }

    match state.store.insert_planet(&planet).await {
        Ok(()) => {
            if let Err(e) = state
                .queue
                .put(&planet.planet_id, planet.next_round_time)
                .await
            {
                warn!(planet_id = %planet.planet_id, error = %e, "failed to index new planet");
            }
            state.engine.nudge();
            (StatusCode::CREATED, Json(planet)).into_response()
        }
        Err(StoreError::AlreadyExists(_)) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!(
                    "Planet with planet_id \"{}\" already exists",
                    planet.planet_id
                ),
            }),
        )
            .into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

async fn get_planet(
    State(state): State<Arc<AppState>>,
    Path(planet_id): Path<String>,
) -> Response {
    match state.store.get_planet(&planet_id).await {
        Ok(Some(planet)) => Json(planet).into_response(),
        Ok(None) => not_found("Planet not found"),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// Deletes a planet unless a worker is processing it right now.
async fn remove_planet(
    State(state): State<Arc<AppState>>,
    Path(planet_id): Path<String>,
) -> Response {
    match state.store.get_planet(&planet_id).await {
        Ok(Some(planet)) if planet.status == PlanetStatus::Processing => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!(
                    "Cannot remove planet \"{planet_id}\" while it is being processed"
                ),
            }),
        )
            .into_response(),
        Ok(Some(_)) => {
            if let Err(e) = state.store.delete_planet(&planet_id).await {
                return internal_error(&e.to_string());
            }
            if let Err(e) = state.queue.remove(&planet_id).await {
                warn!(planet_id, error = %e, "failed to remove deleted planet from index");
            }
            Json(MessageResponse {
                status: "success",
                message: format!("Planet \"{planet_id}\" has been removed"),
            })
            .into_response()
        }
        Ok(None) => not_found(&format!("Planet \"{planet_id}\" not found")),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// HTTP fallback for workers that report results over REST instead of the
/// channel. Runs the same success path as a `job_done` frame.
async fn submit_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitResultRequest>,
) -> Response {
    let (Some(planet_id), Some(server_id)) = (req.planet_id, req.server_id) else {
        return bad_request("Missing planet_id or server_id");
    };
    let Some(next_round_time) = req.next_round_time else {
        return bad_request("Missing next_round_time");
    };

    let next_round_time = match DateTime::parse_from_rfc3339(&next_round_time) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => return bad_request(&format!("Invalid datetime format: {e}")),
    };

    let done = JobDone {
        planet_id,
        next_round_time,
        season_id: None,
        round_id: None,
        round_number: None,
    };
    if let Err(e) = state.completion.handle_job_done(&server_id, done).await {
        error!(server_id, error = %e, "result submission failed");
    }

    (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            status: "accepted",
            message: "Result processing initiated".to_owned(),
        }),
    )
        .into_response()
}

/// Runs an assignment pass immediately instead of waiting for the tick.
async fn force_assign(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.run_once().await {
        Ok(assigned) => Json(ResultResponse {
            status: "success",
            result: format!("Assigned {assigned} planets"),
        })
        .into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// Forwards an administrative command to a worker's live session.
async fn send_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> Response {
    let (Some(server_id), Some(action)) = (req.server_id, req.action) else {
        return bad_request("Missing server_id or action");
    };

    let Some(handle) = state.registry.get(&server_id) else {
        return not_found(&format!("No live session for server \"{server_id}\""));
    };

    let frame = OutboundFrame::Command {
        command: action,
        params: req.payload,
    };
    if handle.send(frame).await {
        Json(MessageResponse {
            status: "success",
            message: format!("Command sent to {server_id}"),
        })
        .into_response()
    } else {
        internal_error("Failed to send command")
    }
}

/// Queue and fleet statistics for monitoring.
async fn queue_status(State(state): State<Arc<AppState>>) -> Response {
    let queue_size = state.queue.size().await.unwrap_or(0);
    let next_due_time = state
        .queue
        .peek_next()
        .await
        .ok()
        .flatten()
        .map(|(_, due)| due);

    let counts = async {
        Ok::<_, StoreError>(QueueStatusResponse {
            queue_size,
            next_due_time,
            idle_servers: state
                .store
                .count_workers_with_status(WorkerStatus::Idle)
                .await?,
            busy_servers: state
                .store
                .count_workers_with_status(WorkerStatus::Busy)
                .await?,
            offline_servers: state
                .store
                .count_workers_with_status(WorkerStatus::Offline)
                .await?,
            queued_planets: state
                .store
                .count_planets_with_status(PlanetStatus::Queued)
                .await?,
            processing_planets: state
                .store
                .count_planets_with_status(PlanetStatus::Processing)
                .await?,
        })
    };

    match counts.await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

async fn list_servers(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_workers().await {
        Ok(workers) => Json(workers).into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

async fn server_detail(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Response {
    match state.store.get_worker(&server_id).await {
        Ok(Some(worker)) => Json(worker).into_response(),
        Ok(None) => not_found("Server not found"),
        Err(e) => internal_error(&e.to_string()),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
        .into_response()
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
        .into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
        .into_response()
}

// Request types

#[derive(Deserialize)]
struct CreatePlanetRequest {
    planet_id: Option<String>,
    map_id: Option<String>,
    season_id: Option<i64>,
    round_id: Option<i64>,
    current_round_number: Option<i64>,
}

#[derive(Deserialize)]
struct SubmitResultRequest {
    planet_id: Option<String>,
    server_id: Option<String>,
    next_round_time: Option<String>,
}

#[derive(Deserialize)]
struct CommandRequest {
    server_id: Option<String>,
    action: Option<String>,
    payload: Option<serde_json::Value>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct MessageResponse {
    status: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ResultResponse {
    status: &'static str,
    result: String,
}

#[derive(Serialize)]
struct QueueStatusResponse {
    queue_size: u64,
    next_due_time: Option<DateTime<Utc>>,
    idle_servers: u64,
    busy_servers: u64,
    offline_servers: u64,
    queued_planets: u64,
    processing_planets: u64,
}


#[cfg(test)]
mod tests {
    use super::test_support::make_state;
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use orrery_state::Worker;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (state, _) = make_state();
        let app = router(state);

        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_planet_returns_snapshot_and_indexes() {
        let (state, harness) = make_state();
        let app = router(state);

        let response = app
            .oneshot(post_json(
                "/planet/create",
                serde_json::json!({"planet_id": "79001", "season_id": 42}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["planet_id"], "79001");
        assert_eq!(body["season_id"], 42);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["round_id"], 0);

        // Indexed and immediately due.
        let due = harness.queue.due(harness.clock.now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "79001");
    }

    #[tokio::test]
    async fn create_accepts_map_id_alias() {
        let (state, _) = make_state();
        let app = router(state);

        let response = app
            .oneshot(post_json(
                "/planet/create",
                serde_json::json!({"map_id": "79002", "season_id": 1}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["planet_id"], "79002");
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let (state, harness) = make_state();
        let app = router(state);

        let request = serde_json::json!({"planet_id": "p1", "season_id": 1});
        let response = app
            .clone()
            .oneshot(post_json("/planet/create", request.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(post_json("/planet/create", request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Exactly one index entry survives.
        assert_eq!(harness.queue.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_validates_identifier_and_season() {
        let (state, _) = make_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/planet/create",
                serde_json::json!({"planet_id": "bad id!", "season_id": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post_json(
                "/planet/create",
                serde_json::json!({"planet_id": "p1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json("/planet/create", serde_json::json!({"season_id": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_planet_found_and_missing() {
        let (state, harness) = make_state();
        harness
            .store
            .insert_planet(&Planet::new("p1", 1, harness.clock.now()))
            .await
            .unwrap();
        let app = router(state);

        let response = app.clone().oneshot(get_req("/planet/p1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_req("/planet/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn remove_planet_guards_processing() {
        let (state, harness) = make_state();
        let now = harness.clock.now();

        let mut planet = Planet::new("p1", 1, now);
        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some("w1".to_owned());
        harness.store.insert_planet(&planet).await.unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/planet/remove/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Completion frees the planet; deletion now succeeds.
        planet.status = PlanetStatus::Queued;
        planet.processing_server_id = None;
        harness.store.update_planet(&planet).await.unwrap();
        harness.queue.put("p1", now).await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/planet/remove/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(harness.store.get_planet("p1").await.unwrap().is_none());
        assert_eq!(harness.queue.size().await.unwrap(), 0);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/planet/remove/p1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queue_status_reports_counts() {
        let (state, harness) = make_state();
        let now = harness.clock.now();

        harness
            .store
            .insert_planet(&Planet::new("p1", 1, now))
            .await
            .unwrap();
        harness.queue.put("p1", now).await.unwrap();

        let mut idle = Worker::connected("w1", "unknown", now);
        idle.status = WorkerStatus::Idle;
        harness.store.upsert_worker(&idle).await.unwrap();

        let app = router(state);
        let response = app.oneshot(get_req("/queue")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["queue_size"], 1);
        assert_eq!(body["idle_servers"], 1);
        assert_eq!(body["busy_servers"], 0);
        assert_eq!(body["queued_planets"], 1);
        assert_eq!(body["processing_planets"], 0);
        assert!(body["next_due_time"].is_string());
    }

    #[tokio::test]
    async fn command_requires_live_session() {
        let (state, _) = make_state();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/command",
                serde_json::json!({"server_id": "w1", "action": "restart"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let (tx, mut rx) = mpsc::channel(4);
        state.registry.attach("w1", tx, state.clock.now());

        let response = app
            .oneshot(post_json(
                "/command",
                serde_json::json!({"server_id": "w1", "action": "restart", "payload": {"delay": 5}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        match rx.recv().await.unwrap() {
            OutboundFrame::Command { command, params } => {
                assert_eq!(command, "restart");
                assert_eq!(params.unwrap()["delay"], 5);
            }
            other => panic!("expected command frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn force_assign_dispatches_due_work() {
        let (state, harness) = make_state();
        let now = harness.clock.now();

        harness
            .store
            .insert_planet(&Planet::new("p1", 1, now))
            .await
            .unwrap();
        harness.queue.put("p1", now).await.unwrap();

        let mut worker = Worker::connected("w1", "unknown", now);
        worker.status = WorkerStatus::Idle;
        harness.store.upsert_worker(&worker).await.unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        state.registry.attach("w1", tx, now);

        let app = router(state);
        let response = app
            .oneshot(post_json("/force-assign", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["result"], "Assigned 1 planets");
        assert!(matches!(
            rx.recv().await,
            Some(OutboundFrame::AssignJob { .. })
        ));
    }

    #[tokio::test]
    async fn submit_result_runs_the_success_path() {
        let (state, harness) = make_state();
        let now = harness.clock.now();

        let mut planet = Planet::new("p1", 1, now);
        planet.status = PlanetStatus::Processing;
        planet.processing_server_id = Some("w1".to_owned());
        harness.store.insert_planet(&planet).await.unwrap();

        let mut worker = Worker::connected("w1", "unknown", now);
        worker.status = WorkerStatus::Busy;
        worker.current_task = Some("p1".to_owned());
        harness.store.upsert_worker(&worker).await.unwrap();

        let next = now + chrono::Duration::seconds(60);
        let app = router(state);
        let response = app
            .clone()
            .oneshot(post_json(
                "/result",
                serde_json::json!({
                    "planet_id": "p1",
                    "server_id": "w1",
                    "next_round_time": next.to_rfc3339(),
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let planet = harness.store.get_planet("p1").await.unwrap().unwrap();
        assert_eq!(planet.status, PlanetStatus::Queued);
        let worker = harness.store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(worker.total_completed, 1);

        let response = app
            .oneshot(post_json(
                "/result",
                serde_json::json!({
                    "planet_id": "p1",
                    "server_id": "w1",
                    "next_round_time": "not-a-time",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn server_listing_and_detail() {
        let (state, harness) = make_state();
        harness
            .store
            .upsert_worker(&Worker::connected("w1", "unknown", harness.clock.now()))
            .await
            .unwrap();

        let app = router(state);
        let response = app.clone().oneshot(get_req("/servers")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let response = app.clone().oneshot(get_req("/server/w1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["server_id"], "w1");
        assert_eq!(body["status"], "not_initialized");

        let response = app.oneshot(get_req("/server/ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
