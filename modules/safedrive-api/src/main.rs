use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use safedrive_api::{router, AppState};
use safedrive_common::Config;
use safedrive_store::PgIncidentStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("safedrive=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let store = PgIncidentStore::connect(config.require_database_url()?, 10).await?;
    store.migrate().await?;

    let state = Arc::new(AppState {
        store: Arc::new(store),
    });
    let app = router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("SafeDrive API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
