use std::sync::Arc;

use delivery_tracker::api;
use delivery_tracker::config::Config;
use delivery_tracker::engine::broadcaster::run_broadcaster;
use delivery_tracker::error::AppError;
use delivery_tracker::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let (app_state, tracking_rx) = AppState::in_memory(
        config.tracking.clone(),
        config.tracking_queue_size,
        config.customer_channel_size,
    );
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_broadcaster(shared_state.clone(), tracking_rx));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        history_interval_secs = config.tracking.history_interval_secs,
        arrival_radius_meters = config.tracking.arrival_radius_meters,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
