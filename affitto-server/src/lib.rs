use anyhow::Context;
use axum::http::StatusCode;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

pub mod auth;
pub mod chat;
pub mod controllers;
pub mod error;
pub mod registry;
pub mod routes;
pub mod store;

use registry::ConnectionRegistry;
use store::MessageStore;

/// Shared process-lifetime state: DB pool, live-connection registry, message
/// store, upload directory. Created at server start; the registry always
/// starts empty after a restart.
pub struct AppState {
    pub pool: SqlitePool,
    pub registry: ConnectionRegistry,
    pub store: MessageStore,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(pool: SqlitePool, upload_dir: PathBuf) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store: MessageStore::new(pool.clone()),
            pool,
            upload_dir,
        }
    }
}

// Given a file path, return a valid SQLite URL. Creates parent directories if
// they do not exist.
pub fn sqlite_url_for_path(p: &Path) -> anyhow::Result<String> {
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dirs for {:?}", parent))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&abs)
        .with_context(|| format!("create/open sqlite file {:?}", abs))?;
    let s = abs.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite:///{}", s))
}

/// Build a SQLite DB URL from the DATABASE_URL environment variable, falling
/// back to "affitto.db" in the current directory.
pub fn build_sqlite_url() -> anyhow::Result<String> {
    let raw = std::env::var("DATABASE_URL").unwrap_or_else(|_| "affitto.db".to_string());
    if raw == "sqlite::memory:" {
        return Ok(raw);
    }
    // Strip a "sqlite://" prefix if present to get the file path.
    let path_part = if raw.starts_with("sqlite://") {
        raw.trim_start_matches("sqlite:///")
            .trim_start_matches("sqlite://")
            .to_string()
    } else {
        raw
    };
    sqlite_url_for_path(&PathBuf::from(path_part))
}

// Connect to the database and return a connection pool.
pub async fn connect_pool(db_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePool::connect(db_url)
        .await
        .with_context(|| format!("connect to sqlite via {}", db_url))?;
    Ok(pool)
}

// Apply the schema. Creates the tables if they do not exist.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Enable foreign keys (SQLite)
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .context("enable foreign_keys")?;

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id       TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            phone         TEXT,
            role          TEXT NOT NULL DEFAULT 'tenant' CHECK(role IN ('tenant','owner')),
            address       TEXT,
            bio           TEXT,
            token         TEXT,
            created_at    TEXT NOT NULL
        );"#,
        r#"
        CREATE TABLE IF NOT EXISTS properties (
            property_id TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            description TEXT,
            location    TEXT NOT NULL,
            city        TEXT NOT NULL,
            price       INTEGER NOT NULL,
            kind        TEXT NOT NULL,
            bedrooms    INTEGER NOT NULL DEFAULT 0,
            bathrooms   INTEGER NOT NULL DEFAULT 0,
            size        INTEGER NOT NULL DEFAULT 0,
            images      TEXT NOT NULL DEFAULT '[]',
            featured    INTEGER NOT NULL DEFAULT 0,
            available   INTEGER NOT NULL DEFAULT 1,
            owner_id    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            FOREIGN KEY(owner_id) REFERENCES users(user_id)
        );"#,
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            message_id  TEXT PRIMARY KEY,
            property_id TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            body        TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            delivered   INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(sender_id)   REFERENCES users(user_id),
            FOREIGN KEY(receiver_id) REFERENCES users(user_id)
        );"#,
        r#"
        CREATE TABLE IF NOT EXISTS payment_intents (
            intent_id     TEXT PRIMARY KEY,
            property_id   TEXT NOT NULL,
            user_id       TEXT NOT NULL,
            amount        INTEGER NOT NULL,
            client_secret TEXT NOT NULL,
            status        TEXT NOT NULL CHECK(status IN ('requires_confirmation','succeeded')),
            created_at    TEXT NOT NULL,
            FOREIGN KEY(property_id) REFERENCES properties(property_id),
            FOREIGN KEY(user_id)     REFERENCES users(user_id)
        );"#,
    ];
    // apply each migration statement
    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| {
                format!(
                    "apply migration: {}",
                    &s[..s.len().min(40)].replace('\n', " ")
                )
            })?;
    }
    Ok(())
}

/// Database health check: try to acquire a connection from the pool.
pub async fn health_with_pool(pool: &SqlitePool) -> StatusCode {
    match pool.acquire().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
