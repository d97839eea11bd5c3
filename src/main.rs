//! Reunions Linking Server
//!
//! HTTP front for the linking relationship core. Serves canvas views, the
//! global relationship cache, geotag search, and save/delete operations
//! against AnnoRepo.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reunions_linking::config::Config;
use reunions_linking::routes;
use reunions_linking::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reunions_linking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Reunions Linking v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("AnnoRepo: {} (container {})", config.store.base_url, config.store.container);
    if config.store.token.is_none() {
        tracing::warn!("No ANNOREPO_TOKEN set, writes will be rejected by the store");
    }

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid SERVER_HOST")?,
        config.server.port,
    );
    let default_canvas = config.default_canvas.clone();

    let app_state = AppState::from_config(config).context("Failed to initialize application state")?;

    // Progressive loading of the global cache runs in the background
    let watcher = app_state.cache().spawn_watcher();
    let initial = app_state.cache().get().await;
    match &initial.last_error {
        Some(e) => tracing::warn!("Initial relationship fetch failed: {}. Will retry on demand", e),
        None => tracing::info!("Relationship cache primed with {} annotations", initial.annotations().len()),
    }

    if let Some(canvas_id) = default_canvas {
        let view = app_state.canvases().loader(&canvas_id).load(&canvas_id).await;
        tracing::info!(
            canvas_id = %canvas_id,
            annotations = view.annotations.len(),
            linking = view.linking.len(),
            "Default canvas loaded"
        );
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    tracing::info!("Reunions Linking listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    watcher.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
