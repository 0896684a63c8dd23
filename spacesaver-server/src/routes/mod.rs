pub mod handlers;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full HTTP surface from §6, layering CORS and request
/// tracing exactly as the teacher's `main::create_app` does.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/version", get(handlers::version))
        .route("/status", get(handlers::status))
        .route("/list", get(handlers::list))
        .route("/list/{id}", get(handlers::get_entry))
        .route("/request/enqueue/best", post(handlers::enqueue_best))
        .route("/request/enqueue/{id}", post(handlers::enqueue))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
