// Skillvesta Server - membership community backend

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use skillvesta::{api::create_router, app_state::AppState, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    let addr = config.server_address();

    // Initialize application state; no ledger clients are wired here, so
    // paid settlement flows report a configuration error until an embedder
    // supplies RPC-backed implementations.
    let app_state = AppState::new(config).await?;

    // Build main application router
    let app = Router::new()
        .nest("/api/v1", create_router(app_state))
        .layer(CorsLayer::permissive());

    info!("Skillvesta server starting on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
