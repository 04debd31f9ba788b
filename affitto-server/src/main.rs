use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use affitto_server::{build_sqlite_url, connect_pool, routes, run_migrations, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Build the SQLite URL and prepare the database
    let db_url = build_sqlite_url().context("build sqlite DATABASE_URL")?;
    tracing::info!("using DATABASE_URL = {}", db_url);
    let pool = connect_pool(&db_url).await.context("connect to sqlite")?;
    run_migrations(&pool).await.context("run migrations")?;

    let upload_dir =
        PathBuf::from(std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()));
    std::fs::create_dir_all(&upload_dir).context("create upload dir")?;

    // Shared application state; the connection registry starts empty
    let state = Arc::new(AppState::new(pool, upload_dir));
    let app = routes::router(state);

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let addr: SocketAddr = bind.parse().context("parse BIND_ADDR")?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind tcp listener")?;
    axum::serve(listener, app.into_make_service())
        .await
        .context("server shutdown")?;

    Ok(())
}
