use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;

use crate::{chat, controllers, health_with_pool, AppState};

pub fn router(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(state.upload_dir.clone());
    Router::new()
        .route(
            "/health",
            get(|Extension(state): Extension<Arc<AppState>>| async move {
                health_with_pool(&state.pool).await
            }),
        )
        .route("/api/register", post(controllers::register))
        .route("/api/login", post(controllers::login))
        .route(
            "/api/user/profile",
            get(controllers::get_profile).put(controllers::update_profile),
        )
        .route("/api/user/properties", get(controllers::my_properties))
        .route(
            "/api/properties",
            get(controllers::list_properties).post(controllers::create_property),
        )
        .route(
            "/api/properties/featured",
            get(controllers::featured_properties),
        )
        .route(
            "/api/properties/:id",
            get(controllers::get_property)
                .put(controllers::update_property)
                .delete(controllers::delete_property),
        )
        .route("/api/contact", post(controllers::contact))
        .route(
            "/api/create-payment-intent",
            post(controllers::create_payment_intent),
        )
        .route("/api/confirm-payment", post(controllers::confirm_payment))
        .route("/ws", get(chat::ws_handler))
        .nest_service("/uploads", uploads)
        // anything else falls back to the static frontend
        .fallback_service(ServeDir::new("public").append_index_html_on_directories(true))
        .layer(Extension(state))
}
