use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkgate_core::{GitHubClient, SqliteStore};
use checkgate_server::config::Config;
use checkgate_server::{build_router, AppState};

const DEFAULT_LOG_FILTER: &str = "checkgate_server=info,checkgate_core=info,tower_http=info";

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Starting checkgate generator plugin");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Loaded configuration: {:?}", config);

    let store = Arc::new(
        SqliteStore::open(&config.db_file)
            .with_context(|| format!("Failed to open {}", config.db_file.display()))?,
    );
    let github = GitHubClient::new(
        config.github_token.clone(),
        &config.github_api_url,
        config.enable_github_caching,
    )?;
    if config.enable_github_caching {
        info!("GitHub response caching enabled");
    }

    let app_state = Arc::new(AppState {
        store: store.clone(),
        checker: Arc::new(github),
        plugin_auth_token: config.plugin_auth_token.clone(),
    });
    if app_state.plugin_auth_token.is_none() {
        info!("PLUGIN_AUTH_TOKEN not set, generator endpoint is unauthenticated");
    }

    let app = build_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await?;
    info!("Store closed");

    Ok(())
}
