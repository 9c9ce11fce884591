mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;

use config::{AppConfig, EmbeddingConfig};
use kept_core::db::Database;
use kept_core::embedding::{DisabledEmbedder, Embedder, OpenAiEmbedder};
use kept_core::sync::SyncEngine;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kept_api=info".parse().expect("valid directive"))
                .add_directive("kept_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting kept-api with config: {:?}", config);

    let db = if config.database_path == ":memory:" {
        Database::open_in_memory().await?
    } else {
        Database::open(&config.database_path).await?
    };
    let mut engine = SyncEngine::new(Arc::new(db), build_embedder(config.embedding.as_ref())?);
    if let Some(embedding) = config.embedding.as_ref() {
        engine = engine.with_embedding_timeout(embedding.timeout);
    }

    let state = AppState::new(config, Arc::new(engine));
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("kept-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

fn build_embedder(
    config: Option<&EmbeddingConfig>,
) -> Result<Arc<dyn Embedder>, Box<dyn std::error::Error>> {
    let Some(config) = config else {
        tracing::warn!("OPENAI_API_KEY is not set; notes will sync without embeddings");
        return Ok(Arc::new(DisabledEmbedder));
    };

    let embedder = OpenAiEmbedder::new(
        config.api_key.clone(),
        config.base_url.clone(),
        config.model.clone(),
        config.timeout,
    )?;
    tracing::info!(model = embedder.model(), "Note embeddings enabled");
    Ok(Arc::new(embedder))
}
