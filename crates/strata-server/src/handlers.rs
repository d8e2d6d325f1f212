//! Request handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use strata_core::ids::{ContextId, PropertyId, ServiceTypeId, UserId, ValueId};
use strata_core::{ErrorKind, PermissionScope, PropertyTree, VariationNameMap};
use strata_engine::{
    Configuration, ConfigurationRequest, EngineError, PermissionCheck, StrataEngine,
};
use strata_traits::{NewVariationProperty, NewVariationPropertyValue};

/// Application state.
pub struct AppState {
    /// The variation engine
    pub engine: Arc<StrataEngine>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message
    pub error: String,
    /// Error classification
    pub kind: ErrorKind,
}

/// An engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

/// Status code for an error classification.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidOperation => StatusCode::CONFLICT,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// HEALTH
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// Health check handler.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// HIERARCHY
// =============================================================================

/// Hierarchy response.
#[derive(Serialize)]
pub struct HierarchyResponse {
    /// Properties with their value trees.
    pub properties: Vec<PropertyTree>,
}

/// Returns every property with its value tree.
pub async fn get_hierarchy(State(state): State<Arc<AppState>>) -> ApiResult<Json<HierarchyResponse>> {
    let hierarchy = state.engine.get_variation_hierarchy().await?;
    Ok(Json(HierarchyResponse {
        properties: hierarchy.property_trees(),
    }))
}

/// Id of a created entity.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse<T> {
    /// New id.
    pub id: T,
}

/// Create a variation property.
pub async fn create_property(
    State(state): State<Arc<AppState>>,
    Json(property): Json<NewVariationProperty>,
) -> ApiResult<(StatusCode, Json<CreatedResponse<PropertyId>>)> {
    let id = state.engine.create_variation_property(&property).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// Create a variation property value.
pub async fn create_value(
    State(state): State<Arc<AppState>>,
    Json(value): Json<NewVariationPropertyValue>,
) -> ApiResult<(StatusCode, Json<CreatedResponse<ValueId>>)> {
    let id = state.engine.create_variation_property_value(&value).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

fn default_true() -> bool {
    true
}

/// Archive request body.
#[derive(Debug, Deserialize)]
pub struct ArchiveRequest {
    /// `false` restores an archived value.
    #[serde(default = "default_true")]
    pub archived: bool,
}

/// Archive or restore a value.
pub async fn archive_value(
    State(state): State<Arc<AppState>>,
    Path(value_id): Path<u64>,
    Json(request): Json<ArchiveRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .archive_variation_property_value(ValueId(value_id), request.archived)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Link request body.
#[derive(Debug, Deserialize)]
pub struct LinkPropertyRequest {
    /// Property appended to the service type's priority order.
    pub property_id: PropertyId,
}

/// Append a property to a service type.
pub async fn link_service_type_property(
    State(state): State<Arc<AppState>>,
    Path(service_type_id): Path<u64>,
    Json(request): Json<LinkPropertyRequest>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .link_service_type_property(ServiceTypeId(service_type_id), request.property_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// VARIATION CONTEXTS
// =============================================================================

/// Variation context request body.
#[derive(Debug, Deserialize)]
pub struct VariationContextRequest {
    /// Service type whose properties the variation uses.
    pub service_type_id: ServiceTypeId,
    /// Property name to value.
    #[serde(default)]
    pub variation: VariationNameMap,
}

/// Find or create the context of a variation.
pub async fn variation_context(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VariationContextRequest>,
) -> ApiResult<Json<CreatedResponse<ContextId>>> {
    let id = state
        .engine
        .context_id_for_variation(request.service_type_id, &request.variation)
        .await?;
    Ok(Json(CreatedResponse { id }))
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Resolve configuration.
pub async fn get_configuration(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigurationRequest>,
) -> ApiResult<Json<Configuration>> {
    Ok(Json(state.engine.get_configuration(&request).await?))
}

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Permission check request body.
#[derive(Debug, Deserialize)]
pub struct PermissionCheckRequest {
    /// Caller; absent for anonymous callers.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Entity being accessed.
    pub scope: PermissionScope,
    /// Variation being accessed, property name to value.
    #[serde(default)]
    pub variation: VariationNameMap,
}

/// Check a caller's permission level.
pub async fn check_permission(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PermissionCheckRequest>,
) -> ApiResult<Json<PermissionCheck>> {
    let check = state
        .engine
        .check_permission(request.user_id, &request.scope, &request.variation)
        .await?;
    Ok(Json(check))
}
