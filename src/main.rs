use anyhow::Context;
use tracing_subscriber::EnvFilter;

use reply_backend::{
    config::{Config, ModelConfig},
    routes::build_app,
    services::{
        generator::GenerativeResolver,
        reply_table::ReplyTable,
        resolver::ResolutionService,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let table = match &config.reply_table {
        Some(path) => ReplyTable::load(path)
            .with_context(|| format!("failed to load reply table {}", path.display()))?,
        None => {
            tracing::info!("CHAT_REPLY_TABLE not set, running without canned replies");
            ReplyTable::empty()
        }
    };
    tracing::info!(entries = table.len(), "reply table ready");

    let mut resolver = ResolutionService::new(table).with_timeout(config.generation_timeout);
    if let Some(model) = config.model.clone() {
        let generator = tokio::task::spawn_blocking(move || load_generator(&model))
            .await
            .context("model loading task failed")??;
        resolver = resolver.with_generator(generator, config.generation.clone());
    }
    tracing::info!(generator = resolver.has_generator(), "resolution service ready");

    if config.cors.origins.is_none() {
        tracing::warn!("CHAT_CORS_ORIGINS not set, echoing back any request origin");
    }

    let app = build_app(
        AppState::shared(resolver),
        config.cors.layer(),
        config.static_dir.as_deref(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("chat service listening on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

#[cfg(feature = "candle")]
fn load_generator(model: &ModelConfig) -> anyhow::Result<GenerativeResolver> {
    tracing::info!(model_id = %model.id, revision = %model.revision, "loading model");
    reply_backend::services::generator::candle_backend::load(&model.id, &model.revision)
        .with_context(|| format!("failed to load model {}", model.id))
}

#[cfg(not(feature = "candle"))]
fn load_generator(model: &ModelConfig) -> anyhow::Result<GenerativeResolver> {
    anyhow::bail!(
        "CHAT_MODEL_ID is set to {} but this binary was built without the `candle` feature",
        model.id
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
