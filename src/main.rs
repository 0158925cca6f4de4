use std::net::SocketAddr;
use std::path::PathBuf;

use scribe::config::Configuration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    scribe::telemetry::init_tracing();

    let mut config = Configuration::default();
    if let Some(path) = std::env::args().nth(1) {
        config = config.path(PathBuf::from(path));
    }
    let config = match config.read().and_then(|config| config.with_overrides(std::env::vars())) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return Err(err.into());
        },
    };

    let metrics = match scribe::telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "cannot install prometheus recorder, metrics are disabled");
            None
        },
    };

    let port = config.port;
    let state = match scribe::initialize_state(config, metrics).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start server");
            return Err(err);
        },
    };
    let lifecycle = std::sync::Arc::clone(&state.lifecycle);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, environment = state.config.environment.as_str(), "listening");

    axum::serve(listener, scribe::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    lifecycle.shutdown().await;
    tracing::info!("server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
