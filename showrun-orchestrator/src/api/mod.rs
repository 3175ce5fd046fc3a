//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod pipeline;
pub mod stage;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::store::Store;

/// Create the main API router with all endpoints
pub fn create_router(store: Arc<dyn Store>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipeline/create", post(pipeline::create_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route("/pipeline/{id}", get(pipeline::get_pipeline))
        .route("/pipeline/{id}/start", post(pipeline::start_pipeline))
        // Stage endpoints
        .route("/stage/ready", get(stage::list_ready_stages))
        .route("/stage/{id}/claim", post(stage::claim_stage))
        .route("/stage/{id}/start", post(stage::start_stage))
        .route("/stage/{id}/complete", post(stage::complete_stage))
        .route("/stage/{id}/fail", post(stage::fail_stage))
        // Add state and middleware
        .with_state(store)
        .layer(TraceLayer::new_for_http())
}
