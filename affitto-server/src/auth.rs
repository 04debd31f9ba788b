//! Bearer-token authentication shared by the REST handlers and the WS
//! handshake. Tokens are opaque values issued at register/login and stored on
//! the user row; validation is a lookup.

use affitto_core::{Error, Role, User};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// REST error shape: status code plus the shared error body.
pub type ApiError = (StatusCode, Json<Error>);

pub fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(Error::new("bad_request", msg)),
    )
}

pub fn unauthorized(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(Error::new("unauthorized", msg)),
    )
}

pub fn forbidden(msg: impl Into<String>) -> ApiError {
    (StatusCode::FORBIDDEN, Json(Error::new("forbidden", msg)))
}

pub fn not_found(msg: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, Json(Error::new("not_found", msg)))
}

/// Log the cause, answer with a generic 500.
pub fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Error::new("internal_error", "server error")),
    )
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

/// Look up the user owning `token`. None means unknown or revoked.
pub async fn user_for_token(pool: &SqlitePool, token: &str) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query("SELECT user_id, name, email, role, phone FROM users WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?;
    row.map(|r| user_from_row(&r)).transpose()
}

/// Authenticate a REST request or reject it with 401.
pub async fn require_user(pool: &SqlitePool, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| unauthorized("no token provided"))?;
    match user_for_token(pool, &token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized("token is not valid")),
        Err(e) => Err(internal(e)),
    }
}

pub fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    Ok(User {
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        // the CHECK constraint keeps the column to the two known values
        role: Role::parse(&role).unwrap_or(Role::Tenant),
        phone: row.try_get("phone")?,
    })
}
