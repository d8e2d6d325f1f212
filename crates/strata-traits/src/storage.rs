//! Storage traits for persistence.
//!
//! These traits define the collaborator contracts the engine consumes:
//! - [`HierarchyStore`]: variation properties, values and service-type links
//! - [`VariationContextStore`]: canonical value-set identifiers
//! - [`ConfigurationStore`]: service versions, changesets and value rows
//! - [`PermissionStore`]: users and their grants
//!
//! Storage implementations are EXTENSIONS (e.g., in-memory, redb).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::ids::{
    ChangesetId, ContextId, FeatureId, KeyId, PropertyId, ServiceId, ServiceTypeId,
    ServiceVersionId, UserId, ValueId,
};
use strata_core::{DataType, PermissionRow, PropertyValueRow, ServiceTypePropertyRow};

use crate::error::TraitError;

// =============================================================================
// HIERARCHY STORE
// =============================================================================

/// A variation property to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariationProperty {
    /// Unique property name.
    pub name: String,
    /// Human readable name.
    pub display_name: String,
}

/// A variation property value to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariationPropertyValue {
    /// Owning property.
    pub property_id: PropertyId,
    /// Parent value of the same property, `None` for a root.
    #[serde(default)]
    pub parent_id: Option<ValueId>,
    /// The value string.
    pub value: String,
}

/// Storage for the variation hierarchy.
///
/// Reads must return rows in the orders the hierarchy builder relies on:
/// values parent-before-child, service-type links in priority order.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Lists every variation property value, parent rows before child rows.
    async fn list_variation_property_values(&self) -> Result<Vec<PropertyValueRow>, TraitError>;

    /// Lists service type to property links in configured priority order.
    async fn list_service_type_variation_properties(
        &self,
    ) -> Result<Vec<ServiceTypePropertyRow>, TraitError>;

    /// Creates a property. Fails with `AlreadyExists` on a duplicate name.
    async fn create_variation_property(
        &self,
        property: &NewVariationProperty,
    ) -> Result<PropertyId, TraitError>;

    /// Creates a value under a property.
    async fn create_variation_property_value(
        &self,
        value: &NewVariationPropertyValue,
    ) -> Result<ValueId, TraitError>;

    /// Sets or clears the archived flag of a value.
    async fn set_variation_property_value_archived(
        &self,
        id: ValueId,
        archived: bool,
    ) -> Result<(), TraitError>;

    /// Appends a property to a service type's priority order.
    async fn link_service_type_property(
        &self,
        service_type_id: ServiceTypeId,
        property_id: PropertyId,
    ) -> Result<(), TraitError>;
}

// =============================================================================
// VARIATION CONTEXT STORE
// =============================================================================

/// Storage for variation contexts.
///
/// Value id slices passed to these methods are sorted and free of duplicates.
#[async_trait]
pub trait VariationContextStore: Send + Sync {
    /// Finds the context whose member set is exactly `value_ids`.
    async fn find_variation_context(
        &self,
        value_ids: &[ValueId],
    ) -> Result<Option<ContextId>, TraitError>;

    /// Creates a context for `value_ids` together with its membership rows.
    ///
    /// Must be idempotent: if a context with the same member set exists, or is
    /// created concurrently, its id is returned.
    async fn create_variation_context(&self, value_ids: &[ValueId])
        -> Result<ContextId, TraitError>;

    /// Returns the member value ids of a context. Fails with `NotFound` for an
    /// unknown context.
    async fn get_variation_context_members(
        &self,
        id: ContextId,
    ) -> Result<Vec<ValueId>, TraitError>;
}

// =============================================================================
// CONFIGURATION STORE
// =============================================================================

/// Which version of a service to resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// Highest version number.
    #[default]
    Latest,
    /// A specific version number.
    Exact(u32),
}

/// A parsed service version specifier: `name`, `name:latest` or `name:<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceVersionSpecifier {
    /// Service name.
    pub service_name: String,
    /// Version selector.
    pub selector: VersionSelector,
}

impl ServiceVersionSpecifier {
    /// Specifier for the latest version of a service.
    pub fn latest(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            selector: VersionSelector::Latest,
        }
    }

    /// Specifier for an exact version of a service.
    pub fn exact(service_name: impl Into<String>, version: u32) -> Self {
        Self {
            service_name: service_name.into(),
            selector: VersionSelector::Exact(version),
        }
    }
}

impl FromStr for ServiceVersionSpecifier {
    type Err = TraitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.split_once(':') {
            Some((name, version)) => (name, Some(version)),
            None => (s, None),
        };

        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(TraitError::InvalidInput(format!(
                "invalid service version specifier '{s}'"
            )));
        }

        let selector = match version.map(str::trim) {
            None | Some("latest") => VersionSelector::Latest,
            Some(v) => v.parse::<u32>().map(VersionSelector::Exact).map_err(|_| {
                TraitError::InvalidInput(format!("invalid version '{v}' in specifier '{s}'"))
            })?,
        };

        Ok(Self {
            service_name: name.to_string(),
            selector,
        })
    }
}

impl fmt::Display for ServiceVersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selector {
            VersionSelector::Latest => write!(f, "{}:latest", self.service_name),
            VersionSelector::Exact(v) => write!(f, "{}:{v}", self.service_name),
        }
    }
}

/// A concrete service version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVersionRow {
    /// Service version id.
    pub id: ServiceVersionId,
    /// Owning service.
    pub service_id: ServiceId,
    /// Service name.
    pub service_name: String,
    /// Service type, selecting the property priority order.
    pub service_type_id: ServiceTypeId,
    /// Version number.
    pub version: u32,
    /// Published versions may be served in production mode.
    pub published: bool,
}

/// A changeset and its applied time, if applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetRow {
    /// Changeset id.
    pub id: ChangesetId,
    /// When the changeset was applied.
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl ChangesetRow {
    /// Returns true once the changeset has been applied.
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// One stored key value visible at the requested point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRow {
    /// Service version the key belongs to.
    pub service_version_id: ServiceVersionId,
    /// Feature id.
    pub feature_id: FeatureId,
    /// Feature name.
    pub feature_name: String,
    /// Key id.
    pub key_id: KeyId,
    /// Key name.
    pub key_name: String,
    /// Declared data type of the key.
    pub data_type: DataType,
    /// Variation context the value is scoped to.
    pub variation_context_id: ContextId,
    /// Raw payload.
    pub data: String,
}

/// Storage for versioned configuration values.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Resolves a service name and selector to a version row.
    async fn find_service_version(
        &self,
        service_name: &str,
        selector: VersionSelector,
    ) -> Result<Option<ServiceVersionRow>, TraitError>;

    /// Gets a changeset by id.
    async fn get_changeset(&self, id: ChangesetId) -> Result<Option<ChangesetRow>, TraitError>;

    /// Returns the most recently applied changeset, if any.
    async fn latest_applied_changeset(&self) -> Result<Option<ChangesetRow>, TraitError>;

    /// Fetches the value rows of the given service versions visible at `at`.
    ///
    /// Drafts belonging to `changeset_id` are included when it is not
    /// [`ChangesetId::HEAD`]. Rows are ordered by feature, then key, then
    /// creation.
    async fn fetch_configuration_rows(
        &self,
        service_version_ids: &[ServiceVersionId],
        at: DateTime<Utc>,
        changeset_id: ChangesetId,
    ) -> Result<Vec<ConfigurationRow>, TraitError>;
}

// =============================================================================
// PERMISSION STORE
// =============================================================================

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    /// User id.
    pub id: UserId,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
    /// Global administrators bypass all grants.
    #[serde(default)]
    pub global_admin: bool,
}

/// Storage for users and grants.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Gets a user by id.
    async fn get_user(&self, id: UserId) -> Result<Option<UserRow>, TraitError>;

    /// Lists every grant held by the user, directly or through groups.
    async fn list_user_permissions(&self, id: UserId) -> Result<Vec<PermissionRow>, TraitError>;
}

// =============================================================================
// STORAGE ADAPTER
// =============================================================================

/// Combined storage adapter for all storage traits.
#[derive(Clone)]
pub struct StorageAdapter {
    /// Hierarchy store
    pub hierarchy: Arc<dyn HierarchyStore>,
    /// Variation context store
    pub contexts: Arc<dyn VariationContextStore>,
    /// Configuration store
    pub configuration: Arc<dyn ConfigurationStore>,
    /// Permission store
    pub permissions: Arc<dyn PermissionStore>,
}

impl StorageAdapter {
    /// Uses one backend for every storage family.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: HierarchyStore + VariationContextStore + ConfigurationStore + PermissionStore + 'static,
    {
        Self {
            hierarchy: store.clone(),
            contexts: store.clone(),
            configuration: store.clone(),
            permissions: store,
        }
    }
}

impl fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAdapter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specifier_forms() {
        let bare: ServiceVersionSpecifier = "billing".parse().unwrap();
        assert_eq!(bare, ServiceVersionSpecifier::latest("billing"));

        let latest: ServiceVersionSpecifier = "billing:latest".parse().unwrap();
        assert_eq!(latest.selector, VersionSelector::Latest);

        let exact: ServiceVersionSpecifier = "billing:3".parse().unwrap();
        assert_eq!(exact, ServiceVersionSpecifier::exact("billing", 3));
        assert_eq!(exact.to_string(), "billing:3");
    }

    #[test]
    fn test_malformed_specifiers() {
        for raw in ["", ":3", "billing:", "billing:v2", "billing:-1", "bad name:1", "a:1:2"] {
            let err = raw.parse::<ServiceVersionSpecifier>().unwrap_err();
            assert!(matches!(err, TraitError::InvalidInput(_)), "{raw}");
        }
    }

    #[test]
    fn test_changeset_applied() {
        let open = ChangesetRow {
            id: ChangesetId(4),
            applied_at: None,
        };
        assert!(!open.is_applied());
        let applied = ChangesetRow {
            applied_at: Some(Utc::now()),
            ..open
        };
        assert!(applied.is_applied());
    }
}
