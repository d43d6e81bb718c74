mod background;
mod builder;
mod evaluator;
mod executor;
mod handlers;
mod metrics;
mod profile;
mod recorder;
mod routes;
mod store;
mod trace;

#[cfg(test)]
mod testing;

use anyhow::Context;
use axum::Router;
use background::{BackgroundPool, JobContext};
use codegrade_common::config::{Config, LogFormat};
use codegrade_common::sandbox::SandboxClient;
use executor::Orchestrator;
use profile::ProfileRegistry;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use store::{GradeStore, RedisStore};
use tokio::net::TcpListener;
use tokio::signal;
use trace::TraceClient;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub sandbox: SandboxClient,
    pub store: Arc<dyn GradeStore>,
    pub background: BackgroundPool,
    pub profiles: Arc<ProfileRegistry>,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    info!("codegrade API booting...");

    let profiles = Arc::new(ProfileRegistry::load_or_builtin(&config.run_profiles_path)?);
    info!(languages = ?profiles.languages(), "Run profiles loaded");

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str())
        .context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", config.redis_url);
    let store: Arc<dyn GradeStore> = Arc::new(RedisStore::new(redis_conn));

    let sandbox = SandboxClient::new(&config.sandbox_url, config.sandbox_timeout)
        .context("Failed to build sandbox client")?;
    info!(url = %sandbox.base_url(), timeout_secs = config.sandbox_timeout.as_secs(), "Sandbox client ready");

    let trace = config
        .trace_url
        .as_deref()
        .map(|url| TraceClient::new(url, config.trace_timeout))
        .transpose()?;
    if trace.is_none() {
        info!("TRACE_URL not set, submissions will not be annotated");
    }

    let background = BackgroundPool::start(
        JobContext {
            sandbox: sandbox.clone(),
            trace,
            store: store.clone(),
        },
        config.background_workers,
        config.background_queue,
    );

    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(sandbox.clone(), store.clone(), profiles.clone()),
        sandbox,
        store,
        background,
        profiles,
    });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("API shutdown complete");
    Ok(())
}
