use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common::storage::filesystem::FilesystemBlobStore;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use server::config::AppConfig;
use server::state::AppState;
use server::{build_router, database, seed};

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn"));
    fmt().with_env_filter(env_filter).with_target(true).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = database::init_db(&config.database.url)
        .await
        .context("Failed to connect to the database")?;
    seed::seed_role_permissions(&db).await?;
    seed::ensure_indexes(&db).await?;
    if let Some(admin) = &config.auth.bootstrap_admin {
        seed::ensure_bootstrap_admin(&db, admin).await?;
    }

    let blob_store = FilesystemBlobStore::new(
        config.storage.data_dir.clone(),
        config.storage.max_blob_size,
    )
    .await
    .context("Failed to open the blob store")?;
    info!(root = %blob_store.root().display(), "Blob store ready");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState {
        db,
        config,
        blob_store: Arc::new(blob_store),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server running at http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
