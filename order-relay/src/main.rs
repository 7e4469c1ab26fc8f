//! order-relay service
//!
//! Long-running process that:
//! - Receives signed storefront webhooks and polls merchants as a backstop
//! - Holds new orders for the tenant's delay, then validates them
//! - Exports ready orders in batches to the fulfillment endpoint
//! - Serves the tenant operator API (JWT authenticated)

use order_relay::BoxError;
use order_relay::config::Config;
use order_relay::state::AppState;
use order_relay::tasks::{BackgroundTasks, TaskKind, spawn_pipeline_workers};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::from_env()?;
    tracing::info!("Starting order-relay (env: {})", config.environment);

    let state = AppState::new(&config).await?;
    let app = order_relay::api::create_router(state.clone());

    let mut tasks = BackgroundTasks::new();
    spawn_pipeline_workers(&mut tasks, &state.pipeline);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("order-relay HTTP listening on {http_addr}");

    let token = tasks.shutdown_token();
    tasks.spawn("http_server", TaskKind::Worker, async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            tracing::error!("HTTP server error: {e}");
        }
    });
    tracing::info!(tasks = tasks.len(), "Background tasks started");

    shutdown_signal().await;
    tasks.shutdown().await;
    Ok(())
}

/// `LOG_FORMAT=json` switches to structured output for log shippers
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "order_relay=info,tower_http=info".into());

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal, shutting down gracefully..."),
        _ = terminate => tracing::info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
