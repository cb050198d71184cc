use std::sync::Arc;

use agent_dispatch::api::dispatch_routes;
use agent_dispatch::config::DispatchConfig;
use agent_dispatch::dispatch::{Dispatcher, DispatcherDeps};
use agent_dispatch::events::EventHub;
use agent_dispatch::executor::SimulatedExecutor;
use agent_dispatch::health::spawn_health_broadcast;
use agent_dispatch::pool::WorkerPool;
use agent_dispatch::router::SpecializationRouter;
use agent_dispatch::store::{LibSqlTaskStore, TaskStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DispatchConfig::from_env()?;

    eprintln!("🛠  Agent Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Pool: {} workers in {} bands", config.pool.size, config.pool.bands.len());
    eprintln!("   Task API: http://0.0.0.0:{}/api/tasks", config.port);
    eprintln!("   Worker API: http://0.0.0.0:{}/api/workers", config.port);
    eprintln!("   Event WS: ws://0.0.0.0:{}/ws\n", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn TaskStore> = Arc::new(
        LibSqlTaskStore::new_local(std::path::Path::new(&config.db_path)).await?,
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Dispatch engine ──────────────────────────────────────────────────
    let pool = Arc::new(WorkerPool::new(&config.pool)?);
    let events = EventHub::new();

    let dispatcher = Arc::new(Dispatcher::new(DispatcherDeps {
        pool: Arc::clone(&pool),
        router: SpecializationRouter::standard(),
        store,
        executor: Arc::new(SimulatedExecutor::new(
            config.executor_base_ms,
            config.executor_jitter_ms,
        )),
        events: events.clone(),
    }));

    // Spawn the periodic pool-health broadcast
    let _health_handle = spawn_health_broadcast(pool, events, config.health_interval);

    // ── HTTP/WS server ───────────────────────────────────────────────────
    let app = dispatch_routes(dispatcher);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Dispatch server started");
    axum::serve(listener, app).await?;

    Ok(())
}
