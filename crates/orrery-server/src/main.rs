//! Orrery orchestrator binary.
//!
//! Reconciles persisted state, starts the assignment and health loops, and
//! serves the admin API plus the worker WebSocket channel.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use orrery_server::{
    api, AppState, AssignmentEngine, Clock, CompletionHandler, HealthMonitor,
    OrchestratorConfig, SessionRegistry, StartupReconciler, SystemClock,
};
use orrery_state::{
    MemoryPendingQueue, PendingQueue, PostgresStore, Store, ValkeyPendingQueue,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("orrery_server=info".parse()?),
        )
        .init();

    info!("Orrery orchestrator starting");

    // Load configuration
    let config: OrchestratorConfig = Figment::new()
        .merge(Toml::file("orrery.toml"))
        .merge(Env::prefixed("ORRERY_").split("_"))
        .extract()?;

    info!(listen_addr = %config.api.listen_addr, "Configuration loaded");

    // Connect the durable store; nothing works without it.
    let store: Arc<dyn Store> = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    info!(url = %config.database.url, "Connected to PostgreSQL");

    // Connect the pending-due index. The store remains authoritative, so a
    // missing Valkey degrades to the in-memory index rather than a refusal
    // to start.
    let queue: Arc<dyn PendingQueue> = match ValkeyPendingQueue::new(
        &config.valkey.url,
        config.valkey.queue_key.clone(),
        config.valkey.max_connections,
    )
    .await
    {
        Ok(queue) => {
            info!(url = %config.valkey.url, "Connected to Valkey");
            Arc::new(queue)
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to Valkey, using in-memory index");
            Arc::new(MemoryPendingQueue::new())
        }
    };

    let registry = Arc::new(SessionRegistry::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Reset the world before any loop observes it.
    let reconciler = StartupReconciler::new(store.clone(), queue.clone(), clock.clone());
    let report = reconciler.run().await?;
    info!(
        workers_reset = report.workers_reset,
        planets_recovered = report.planets_recovered,
        "Startup reconciliation done"
    );

    // Core components
    let engine = Arc::new(AssignmentEngine::new(
        store.clone(),
        queue.clone(),
        registry.clone(),
        clock.clone(),
        config.assignment.clone(),
    ));
    let completion = Arc::new(CompletionHandler::new(
        store.clone(),
        queue.clone(),
        clock.clone(),
        engine.clone(),
        config.retry.clone(),
    ));
    let health = Arc::new(HealthMonitor::new(
        store.clone(),
        queue.clone(),
        registry.clone(),
        clock.clone(),
        engine.clone(),
        config.health.clone(),
    ));

    // Background loops
    tokio::spawn(engine.clone().run());
    tokio::spawn(health.run());
    info!("Assignment engine and health loop started");

    // HTTP surface
    let state = Arc::new(AppState {
        store,
        queue,
        registry,
        engine,
        completion,
        clock,
        session_queue_capacity: config.assignment.outbound_capacity,
    });
    let app = api::router(state);

    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Orchestrator API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
