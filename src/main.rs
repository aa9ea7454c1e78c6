mod config;
mod dto;
mod handler;
mod service;
mod validator;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;

use handler::AppState;
use service::SmtpMailer;

#[tokio::main]
async fn main() {
    // Optional .env file, read before the subscriber so it can set RUST_LOG
    let dotenv = dotenvy::dotenv();

    // Log setup
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenv {
        Ok(path) => tracing::info!("Loaded environment from '{}'", path.display()),
        Err(e) if !e.not_found() => tracing::warn!("Failed to read .env file: {e}"),
        Err(_) => {}
    }

    // Load config
    let cfg = config::load_config().unwrap_or_else(|e| {
        tracing::error!("Failed to load configuration: {e}");
        panic!("failed to load configuration: {e}");
    });
    tracing::info!("Successfully loaded email relay config: {:?}", cfg);

    // Setup mailer
    let cfg = Arc::new(cfg);
    let mailer = Arc::new(SmtpMailer::new(&cfg));

    let router = handler::router(AppState {
        config: cfg.clone(),
        mailer,
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cfg.port))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to port {}: {e}", cfg.port);
            panic!("failed to bind to port {}: {e}", cfg.port);
        });

    tracing::info!("Email relay service listening on port {}", cfg.port);
    for warning in cfg.startup_warnings() {
        tracing::warn!("WARNING: {}", warning);
    }
    if cfg.test_mode {
        tracing::info!("Test mode enabled, relay responses and preview URLs will be logged");
    }

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("HTTP server error: {e}");
        panic!("failed to start HTTP server: {e}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        () = ctrl_c => tracing::info!("Received Ctrl+C signal, shutting down gracefully"),
        () = terminate => tracing::info!("Received SIGTERM signal, shutting down gracefully"),
    }
}
