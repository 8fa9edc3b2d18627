mod error;
mod routes;
mod state;

use chrono::Utc;
use clap::Parser;
use docportal_core::{
    bootstrap_env, maybe_init_semantic_cache, ApiKeyManager, AppConfig, ModelLoader,
    PromptRegistry, Telemetry, DEFAULT_CONFIG_PATH,
};
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const TELEMETRY_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "docportal-server", version)]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "DOCPORTAL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.is_file() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
        AppConfig::default()
    };
    bootstrap_env(&[], &config.secrets.api_keys_env);
    let keys = ApiKeyManager::from_env(&config.secrets);

    let telemetry = Arc::new(Telemetry::from_keys(&keys));
    telemetry.init().await;
    let flusher = telemetry.spawn_flusher(TELEMETRY_FLUSH_INTERVAL);

    let cache = maybe_init_semantic_cache(&config, &keys).await;
    let loader = ModelLoader::new(config.clone(), keys).with_semantic_cache(cache);
    let llm = loader.load_llm()?;
    let embedder = loader.load_embeddings()?;
    let embedding_provider = loader.embedding_provider()?;

    let state = AppState::new(
        config,
        llm,
        embedder,
        embedding_provider.to_string(),
        PromptRegistry::builtin()?,
        telemetry.clone(),
    );

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    info!(
        version = app_version,
        address = %listener.local_addr()?,
        started_at = %Utc::now().to_rfc3339(),
        "docportal-server listening"
    );

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(flusher) = flusher {
        flusher.abort();
    }
    let flushed = telemetry.flush().await;
    info!(flushed, "docportal-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
    }
}
