//! # Strata Engine
//!
//! The variation resolution engine for Strata.
//!
//! This crate provides:
//! - [`HierarchyService`]: cached hierarchy snapshots and validated structural writes
//! - [`VariationContextService`]: canonical value-set ids with bidirectional caching
//! - [`ConfigurationResolver`]: filter, rank and reduce stored values for a request
//! - [`PermissionService`]: callers and their grants
//! - [`StrataEngine`]: the facade tying them together over one [`StorageAdapter`]
//!
//! ## Architecture
//!
//! ```text
//! HierarchyStore ──> HierarchyService ──> Arc<Hierarchy> ─┬─> ConfigurationResolver ─> Configuration
//!                                                         │          ▲
//! VariationContextStore ──> VariationContextService ──────┼──────────┘
//!                                                         │
//! PermissionStore ──> PermissionService ──> User ─────────┴─> PermissionCheck
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let engine = StrataEngineBuilder::new()
//!     .with_storage(StorageAdapter::from_store(store))
//!     .with_config(EngineConfig::default())
//!     .build()?;
//!
//! let configuration = engine
//!     .get_configuration(&ConfigurationRequest::new(["billing"]).with_variation([("env", "qa1")]))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod hierarchy;
pub mod permissions;
pub mod resolver;
pub mod variation_context;

mod cache;

// Re-exports
pub use builder::StrataEngineBuilder;
pub use error::{EngineError, EngineResult};
pub use hierarchy::HierarchyService;
pub use permissions::{PermissionCheck, PermissionService};
pub use resolver::{
    Configuration, ConfigurationRequest, ConfigurationResolver, FeatureConfiguration,
    KeyConfiguration, ResolvedValue,
};
pub use variation_context::VariationContextService;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use strata_core::ids::{ContextId, PropertyId, ServiceTypeId, UserId, ValueId};
use strata_core::{
    Hierarchy, PermissionLevel, PermissionScope, User, VariationMap, VariationNameMap,
};
use strata_traits::config::EngineConfig;
use strata_traits::storage::{NewVariationProperty, NewVariationPropertyValue, StorageAdapter};

/// The variation resolution engine.
pub struct StrataEngine {
    /// Engine configuration
    config: EngineConfig,

    /// Hierarchy cache and structural writes
    hierarchy: HierarchyService,

    /// Variation context canonicalization
    contexts: VariationContextService,

    /// Configuration resolution
    resolver: ConfigurationResolver,

    /// Caller loading
    permissions: PermissionService,
}

impl StrataEngine {
    /// Create a new engine.
    pub fn new(config: EngineConfig, storage: StorageAdapter) -> Self {
        info!("Creating variation engine: {}", config.name);

        let StorageAdapter {
            hierarchy,
            contexts,
            configuration,
            permissions,
        } = storage;

        Self {
            hierarchy: HierarchyService::new(hierarchy, config.hierarchy_ttl()),
            contexts: VariationContextService::new(
                contexts,
                config.context_id_cache_capacity,
                config.context_values_cache_capacity,
            ),
            resolver: ConfigurationResolver::new(configuration),
            permissions: PermissionService::new(permissions),
            config,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // HIERARCHY
    // =========================================================================

    /// Current hierarchy snapshot.
    pub async fn get_variation_hierarchy(&self) -> EngineResult<Arc<Hierarchy>> {
        self.hierarchy.get().await
    }

    /// Drop the cached hierarchy so the next reader rebuilds it.
    pub fn invalidate_hierarchy(&self) {
        self.hierarchy.invalidate();
    }

    /// Create a variation property.
    #[instrument(skip(self))]
    pub async fn create_variation_property(
        &self,
        property: &NewVariationProperty,
    ) -> EngineResult<PropertyId> {
        self.hierarchy.create_property(property).await
    }

    /// Create a variation property value.
    #[instrument(skip(self))]
    pub async fn create_variation_property_value(
        &self,
        value: &NewVariationPropertyValue,
    ) -> EngineResult<ValueId> {
        self.hierarchy.create_value(value).await
    }

    /// Archive or restore a variation property value.
    #[instrument(skip(self))]
    pub async fn archive_variation_property_value(
        &self,
        id: ValueId,
        archived: bool,
    ) -> EngineResult<()> {
        self.hierarchy.set_archived(id, archived).await
    }

    /// Append a property to a service type's priority order.
    #[instrument(skip(self))]
    pub async fn link_service_type_property(
        &self,
        service_type_id: ServiceTypeId,
        property_id: PropertyId,
    ) -> EngineResult<()> {
        self.hierarchy
            .link_service_type_property(service_type_id, property_id)
            .await
    }

    // =========================================================================
    // VARIATION CONTEXTS
    // =========================================================================

    /// Context id for a set of value ids, created on first use.
    pub async fn get_variation_context_id(&self, value_ids: &[ValueId]) -> EngineResult<ContextId> {
        let hierarchy = self.hierarchy.get().await?;
        self.contexts
            .get_variation_context_id(&hierarchy, value_ids)
            .await
    }

    /// The variation a context stands for.
    pub async fn get_variation_context_values(&self, id: ContextId) -> EngineResult<VariationMap> {
        let hierarchy = self.hierarchy.get().await?;
        self.contexts
            .get_variation_context_values(&hierarchy, id)
            .await
    }

    /// Context id for a name-keyed variation, as used when writing values.
    ///
    /// Every property must apply to the service type and no value may be
    /// archived.
    #[instrument(skip(self))]
    pub async fn context_id_for_variation(
        &self,
        service_type_id: ServiceTypeId,
        variation: &VariationNameMap,
    ) -> EngineResult<ContextId> {
        let hierarchy = self.hierarchy.get().await?;
        let ids = hierarchy.variation_map_to_ids(service_type_id, variation)?;
        self.contexts.get_variation_context_id(&hierarchy, &ids).await
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    /// Resolve configuration for a request.
    pub async fn get_configuration(
        &self,
        request: &ConfigurationRequest,
    ) -> EngineResult<Configuration> {
        let hierarchy = self.hierarchy.get().await?;
        self.resolver
            .resolve(&hierarchy, &self.contexts, request)
            .await
    }

    // =========================================================================
    // PERMISSIONS
    // =========================================================================

    /// Load a caller with their grants. `None` is the anonymous caller.
    pub async fn load_user(&self, user_id: Option<UserId>) -> EngineResult<User> {
        self.permissions.load_user(user_id).await
    }

    /// Effective permission of a caller for a scope under a variation.
    #[instrument(skip(self))]
    pub async fn check_permission(
        &self,
        user_id: Option<UserId>,
        scope: &PermissionScope,
        variation: &VariationNameMap,
    ) -> EngineResult<PermissionCheck> {
        let hierarchy = self.hierarchy.get().await?;
        let variation = hierarchy.variation_id_map(variation)?;
        let user = self.permissions.load_user(user_id).await?;

        Ok(PermissionCheck {
            level: user.permission_level(&hierarchy, scope, &variation),
            has_nested_permission: user.has_permission_for_nested_entity(scope),
        })
    }

    /// Like [`check_permission`](Self::check_permission), failing with
    /// `PermissionDenied` below `required`.
    pub async fn require_permission(
        &self,
        user_id: Option<UserId>,
        scope: &PermissionScope,
        variation: &VariationNameMap,
        required: PermissionLevel,
    ) -> EngineResult<PermissionCheck> {
        let check = self.check_permission(user_id, scope, variation).await?;
        if check.level < required {
            warn!(?user_id, ?scope, level = ?check.level, ?required, "permission denied");
            return Err(EngineError::PermissionDenied(format!(
                "{:?} required on service {}, caller has {:?}",
                required, scope.service_id, check.level
            )));
        }
        Ok(check)
    }
}

impl std::fmt::Debug for StrataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
