use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beacon_push_service::config::Settings;
use beacon_push_service::gateway::create_gateway;
use beacon_push_service::server::{create_app, AppState};
use beacon_push_service::storage::create_storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Create storage and gateway backends
    let storage = create_storage(&settings.storage).await?;
    let gateway = create_gateway(&settings.gateway);

    // Create application state
    let state = AppState::new(settings.clone(), storage, gateway);
    tracing::info!("Application state initialized");

    // Resume campaigns interrupted mid-send by a previous shutdown
    let orchestrator = state.orchestrator.clone();
    let resume_handle = tokio::spawn(async move {
        match orchestrator.resume_all().await {
            Ok(summaries) if !summaries.is_empty() => {
                tracing::info!(count = summaries.len(), "Resumed interrupted campaigns");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Campaign resume scan failed"),
        }
    });

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = resume_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
