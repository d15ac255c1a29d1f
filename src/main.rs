//! vnc-sidecar server entry point.
//!
//! Starts the Axum HTTP server exposing the VNC WebSocket endpoint.

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vnc_sidecar::api;
use vnc_sidecar::app_state::AppState;
use vnc_sidecar::config::{LogFormat, SidecarConfig};
use vnc_sidecar::vnc::SocketLocator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = SidecarConfig::from_env()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!("KubeVirt VNC sidecar starting");

    let shutdown = CancellationToken::new();
    let locator = SocketLocator::default();
    tracing::info!(base_dir = %locator.base_dir().display(), "resolving VNC sockets");

    let app_state = AppState::new(locator, shutdown.clone());
    let sessions = app_state.sessions.clone();

    // Build router
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Sessions are already cancelled; wait for their teardown to finish.
    sessions.close();
    tracing::info!(remaining = sessions.len(), "waiting for sessions to close");
    sessions.wait().await;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM and cancels every live session.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
