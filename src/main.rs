use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use orderflow::config::Config;
use orderflow::error::CoreError;
use orderflow::notify::HttpPushGateway;
use orderflow::state::{AppState, StateOptions};
use orderflow::store::memory::MemoryStore;
use orderflow::store::{RetryPolicy, StoreBackend};
use orderflow::{api, assign, scheduler};

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let backend: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
    let gateway = Arc::new(HttpPushGateway::new(config.push_gateway_url.clone()));

    let options = StateOptions {
        retry: RetryPolicy {
            max_attempts: config.store_retry_attempts,
            base_delay: Duration::from_millis(config.store_retry_base_ms),
        },
        assign_queue_size: config.assign_queue_size,
        event_buffer_size: config.event_buffer_size,
        gateway_retry_attempts: config.gateway_retry_attempts,
        ..StateOptions::default()
    };
    let (app_state, assign_rx) = AppState::new(backend, gateway, options);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(assign::run_coordinator(shared_state.clone(), assign_rx));
    tokio::spawn(assign::run_reconciliation(
        shared_state.clone(),
        config.reconcile_interval(),
    ));
    tokio::spawn(scheduler::run_activator(
        shared_state.clone(),
        config.activator_interval(),
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| CoreError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| CoreError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
