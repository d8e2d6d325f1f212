//! Route definitions.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use strata_engine::StrataEngine;

use crate::handlers::{self, AppState};

/// Create the API router.
///
/// # Arguments
/// * `engine` - The variation engine
pub fn create_router(engine: Arc<StrataEngine>) -> Router {
    let state = Arc::new(AppState { engine });

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        // Hierarchy
        .route("/api/v1/hierarchy", get(handlers::get_hierarchy))
        .route("/api/v1/hierarchy/properties", post(handlers::create_property))
        .route("/api/v1/hierarchy/values", post(handlers::create_value))
        .route("/api/v1/hierarchy/values/:value_id/archive", post(handlers::archive_value))
        .route(
            "/api/v1/hierarchy/service-types/:service_type_id/properties",
            post(handlers::link_service_type_property),
        )
        // Variation contexts
        .route("/api/v1/variation-contexts", post(handlers::variation_context))
        // Configuration
        .route("/api/v1/configuration", post(handlers::get_configuration))
        // Permissions
        .route("/api/v1/permissions/check", post(handlers::check_permission))
        // State
        .with_state(state)
}
