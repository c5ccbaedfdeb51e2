//! KHQR Gateway issuance service
//!
//! REST API for issuing payment QR codes and checking transaction status

use anyhow::{Context, Result};
use issuance_service::{create_router, AppState, Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "issuance_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting KHQR issuance service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Ledger: {:?} at {}", config.ledger_backend, config.ledger_path.display());
    info!("Image directory: {}", config.image_dir.display());
    info!("Status API: {}", config.status_url);

    // Create application state
    let state = AppState::from_config(&config)
        .await
        .context("Failed to initialize service")?;

    // Create router
    let app = create_router(state);

    // Bind and serve
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("KHQR issuance service running on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
