use std::net::SocketAddr;
use std::sync::Arc;

use server::{http, Config, Coordinator, MemoryStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let coordinator = Arc::new(Coordinator::new(MemoryStore::new(), config.clone()));
    let _sweeper = coordinator.spawn_sweeper();
    info!(
        idle_timeout_secs = config.idle_timeout.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "session sweeper running"
    );

    let app = http::router(coordinator);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
