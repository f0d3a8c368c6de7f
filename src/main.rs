use std::sync::Arc;
use tracing::info;

use paddock::{
    bus::EventBus,
    config::Config,
    gateway::Gateway,
    http::{self, AppState},
    store::Store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let dotenv = dotenvy::dotenv();

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    info!("Paddock messaging service starting...");

    let config = Config::from_env()?;

    info!("Initializing store at {}", config.db_path.display());
    let store = Store::new(&config.db_path)
        .await?
        .with_limits(config.limits.clone());
    store.init().await?;

    let bus = Arc::new(EventBus::new(config.event_buffer));

    // The store doubles as the identity directory
    let gateway = Gateway::new(
        store.clone(),
        Arc::new(store),
        bus,
        config.retry.clone(),
    );
    let app = http::router(Arc::new(AppState { gateway }));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                info!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
