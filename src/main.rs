use std::sync::Arc;
use tracing::{error, info};

use hot_trends::background::TokioBackgroundHost;
use hot_trends::config::Config;
use hot_trends::web::server::WebServer;
use hot_trends::{BackgroundHost, FileStore, HotTrendsEngine, HttpProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hot_trends=info".into()),
        )
        .init();

    info!("hot-trends v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "hot-trends.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        let config = Config::load(&config_path)?;
        info!("Config loaded from {}", config_path);
        config
    } else {
        info!("No config at {}, using defaults", config_path);
        Config::default()
    };

    let provider = Arc::new(HttpProvider::new(&config.provider)?);
    let store = Arc::new(FileStore::new(&config.storage.path));
    let host = Arc::new(TokioBackgroundHost::new(config.scheduler.background_budget()));
    let background: Arc<dyn BackgroundHost> = host.clone();

    // Restores the on-disk cache before anything reads it
    let engine = Arc::new(HotTrendsEngine::new(&config, provider, store, Some(background)));
    engine.start();

    // Start web API
    let web = WebServer::new(engine.clone(), &config.web);
    let web_task = tokio::spawn(async move {
        if let Err(e) = web.run().await {
            error!("Web server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    host.shutdown();
    engine.shutdown().await;
    if let Err(e) = web_task.await {
        error!("Web server task failed: {}", e);
    }

    info!("hot-trends stopped");
    Ok(())
}
