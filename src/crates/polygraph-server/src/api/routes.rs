//! Route definitions and shared application state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use polygraph_core::InferenceService;
use tower_http::trace::TraceLayer;

use crate::api::handlers;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InferenceService>,
}

/// Build the API router.
pub fn create_router(service: Arc<InferenceService>) -> Router {
    Router::new()
        .route("/infer", post(handlers::infer))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}
