use std::sync::Arc;

use anyhow::Context;
use hushroom::{AppState, config::Config, history, rooms};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);
    let history = history::open(&config).await?;
    let core = Arc::new(rooms::BroadcastCore::new(config.broadcast_settings(), history));
    let _sweeper = rooms::spawn_sweeper(Arc::clone(&core), config.room_sweep);

    let app = hushroom::app(AppState {
        core,
        config: Arc::clone(&config),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, room = %config.default_room, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
