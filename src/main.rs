use std::net::SocketAddr;

use anyhow::Result;
use cashback_rewards::{AppState, Config, init_router, init_store};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = init_store(&config).await?;
    let port = config.server_port;
    let app = init_router(AppState::new(store, config));

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;

    info!("cashback server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
