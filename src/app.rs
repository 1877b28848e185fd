use axum::Router;
use tower_http::cors::CorsLayer;

use crate::routes::{analytics, budgets, health, models, sessions};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::<AppState>::new()
        .nest("/health", health::router())
        .nest("/api/models", models::router())
        .nest("/api/sessions", sessions::router())
        .nest("/api/budgets", budgets::router())
        .nest("/api/analytics", analytics::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
