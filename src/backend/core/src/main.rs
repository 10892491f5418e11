//! `leadguard-server`: the global circuit breaker and the operator API in
//! front of it.

use std::sync::Arc;

use leadguard_core::{
    api::{self, AppState},
    breaker::{CircuitBreaker, RedisBreakerStore},
    config::Config,
    coordinator::{QueueCoordinator, ResumeOrchestrator},
    db::Database,
    guard::PipelineGuard,
    jobs::{JobStore, RedisTaskDispatcher},
    observability::{self, metrics},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let loaded = match std::env::var("LEADGUARD_CONFIG") {
        Ok(path) => Config::from_file(&path),
        Err(_) => Config::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Warning: could not load config ({}); using defaults", e);
        Config::fallback()
    });

    observability::init("leadguard-server", &config.observability)?;
    let prometheus = config
        .observability
        .metrics_enabled
        .then(metrics::install_prometheus)
        .transpose()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting leadguard server");

    let guard = build_guard(&config).await?;

    let mut state = AppState::new(guard);
    if let Some(handle) = prometheus {
        state = state.with_metrics(handle);
    }
    let app = api::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    observability::shutdown();
    tracing::info!("Server stopped");
    Ok(())
}

/// Connect both stores and wire breaker, coordinator and guard together.
async fn build_guard(config: &Config) -> anyhow::Result<PipelineGuard> {
    let db = Database::new(&config.database).await?;
    db.migrate().await?;
    tracing::info!("Job store ready");

    let redis_client = redis::Client::open(config.redis.url.as_str())?;

    let breaker = CircuitBreaker::new(Arc::new(RedisBreakerStore::new(
        redis_client.clone(),
        config.redis.breaker_key.clone(),
        config.redis.command_timeout,
    )));
    if let Err(e) = breaker.initialize().await {
        // requests stay blocked until the record is readable
        e.log();
        tracing::warn!(key = %config.redis.breaker_key, "Breaker record not initialized");
    }

    let jobs: Arc<dyn JobStore> = Arc::new(db.job_store());
    let dispatcher = Arc::new(RedisTaskDispatcher::new(
        redis_client,
        config.redis.dispatch_queue_key.clone(),
        config.redis.command_timeout,
    ));
    let orchestrator =
        ResumeOrchestrator::new(jobs.clone(), dispatcher, config.resume.retry_policy());
    let coordinator = QueueCoordinator::new(breaker.clone(), jobs, orchestrator);

    Ok(PipelineGuard::new(breaker, coordinator))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
