//! Parley server
//!
//! Serves conversation turns over HTTP with SQLite-backed checkpoints.

use parley::api::{create_router, AppState};
use parley::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use parley::config::AppConfig;
use parley::llm::{ActiveModel, GeminiService, LlmService, LoggingService, ModelSelector};
use parley::service::OrchestrationService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env()?;
    if let Err(e) = config.validate() {
        tracing::warn!(error = %e, "Every turn will be answered with the apology reply");
    }

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening checkpoint store");
    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open(&config.db_path)?);

    // Backend and model selection
    let api_key = config.google_api_key.clone().unwrap_or_default();
    let gemini: Arc<dyn LlmService> = Arc::new(GeminiService::new(api_key, config.gateway.as_deref())?);
    let backend: Arc<dyn LlmService> = Arc::new(LoggingService::new(gemini));
    let candidates = config.candidates();
    tracing::info!(
        profile = %config.profile,
        candidates = ?candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        window = config.window_size,
        "Configuration loaded"
    );
    let model = Arc::new(ActiveModel::new(
        ModelSelector::new(backend),
        candidates,
        config.reselect_after_failures,
    ));

    let service = Arc::new(OrchestrationService::new(store, model, config.service_config()));

    // Selection failures are retried on the first turn
    match service.warm_up().await {
        Ok(model) => tracing::info!(model = %model, "Model ready"),
        Err(e) => tracing::warn!(error = %e, "No model available at startup"),
    }

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(service))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
