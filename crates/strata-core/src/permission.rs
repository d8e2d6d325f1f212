//! Permission matching.
//!
//! Permissions are grants scoped to a service, a feature, a key, or a key
//! restricted to a set of variation values. A requested scope is checked against
//! every grant the caller holds and the highest matching level wins. Absence of
//! any match is the [`PermissionLevel::Viewer`] floor.
//!
//! Variation grants are hierarchy-aware: a grant for `env=qa` applies to a
//! request for `env=qa1` when `qa` is an ancestor of `qa1`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::hierarchy::Hierarchy;
use crate::ids::{FeatureId, KeyId, PropertyId, ServiceId, UserId};
use crate::types::VariationMap;

// =============================================================================
// LEVELS AND SCOPES
// =============================================================================

/// Permission level. Levels are ordered: each one includes the ones below.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Read access. Implicit floor for everyone.
    #[default]
    Viewer,
    /// May propose and edit values.
    Editor,
    /// May manage the entity and grant permissions on it.
    Owner,
    /// Unrestricted.
    Admin,
}

/// Discriminant of a permission's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Whole service.
    Service,
    /// One feature of a service.
    Feature,
    /// One key of a feature.
    Key,
    /// One key restricted to variation values.
    Variation,
}

/// The entity a permission check is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionScope {
    /// Service.
    pub service_id: ServiceId,
    /// Feature, when the check targets a feature or something inside it.
    #[serde(default)]
    pub feature_id: Option<FeatureId>,
    /// Key, when the check targets a key.
    #[serde(default)]
    pub key_id: Option<KeyId>,
}

impl PermissionScope {
    /// Scope for a whole service.
    pub fn service(service_id: ServiceId) -> Self {
        Self {
            service_id,
            feature_id: None,
            key_id: None,
        }
    }

    /// Scope for a feature.
    pub fn feature(service_id: ServiceId, feature_id: FeatureId) -> Self {
        Self {
            service_id,
            feature_id: Some(feature_id),
            key_id: None,
        }
    }

    /// Scope for a key.
    pub fn key(service_id: ServiceId, feature_id: FeatureId, key_id: KeyId) -> Self {
        Self {
            service_id,
            feature_id: Some(feature_id),
            key_id: Some(key_id),
        }
    }
}

// =============================================================================
// EXPANDED VARIATION
// =============================================================================

/// A variation where each property maps to its value plus all ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedVariation(BTreeMap<PropertyId, BTreeSet<String>>);

impl ExpandedVariation {
    /// Expands `variation` with every value's ancestors from the hierarchy.
    pub fn expand(hierarchy: &Hierarchy, variation: &VariationMap) -> Self {
        let expanded = variation
            .iter()
            .map(|(property_id, value)| {
                let mut values: BTreeSet<String> = hierarchy
                    .parents(*property_id, value)
                    .into_iter()
                    .map(|parent| parent.value.clone())
                    .collect();
                values.insert(value.clone());
                (*property_id, values)
            })
            .collect();
        Self(expanded)
    }

    /// Returns true if the property's expanded values contain `value`.
    pub fn contains(&self, property_id: PropertyId, value: &str) -> bool {
        self.0
            .get(&property_id)
            .is_some_and(|values| values.contains(value))
    }
}

// =============================================================================
// PERMISSION
// =============================================================================

/// A single grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Permission {
    /// Grant over a whole service.
    Service {
        /// Service.
        service_id: ServiceId,
        /// Granted level.
        level: PermissionLevel,
    },
    /// Grant over one feature.
    Feature {
        /// Service.
        service_id: ServiceId,
        /// Feature.
        feature_id: FeatureId,
        /// Granted level.
        level: PermissionLevel,
    },
    /// Grant over one key.
    Key {
        /// Service.
        service_id: ServiceId,
        /// Feature.
        feature_id: FeatureId,
        /// Key.
        key_id: KeyId,
        /// Granted level.
        level: PermissionLevel,
    },
    /// Grant over one key, only for variations containing the required values.
    Variation {
        /// Service.
        service_id: ServiceId,
        /// Feature.
        feature_id: FeatureId,
        /// Key.
        key_id: KeyId,
        /// Required value per property; descendants of a value also qualify.
        required_values: VariationMap,
        /// Granted level.
        level: PermissionLevel,
    },
}

impl Permission {
    /// Returns the scope discriminant.
    pub fn kind(&self) -> ScopeKind {
        match self {
            Self::Service { .. } => ScopeKind::Service,
            Self::Feature { .. } => ScopeKind::Feature,
            Self::Key { .. } => ScopeKind::Key,
            Self::Variation { .. } => ScopeKind::Variation,
        }
    }

    /// Returns the granted level.
    pub fn level(&self) -> PermissionLevel {
        match self {
            Self::Service { level, .. }
            | Self::Feature { level, .. }
            | Self::Key { level, .. }
            | Self::Variation { level, .. } => *level,
        }
    }

    /// Returns the service the grant belongs to.
    pub fn service_id(&self) -> ServiceId {
        match self {
            Self::Service { service_id, .. }
            | Self::Feature { service_id, .. }
            | Self::Key { service_id, .. }
            | Self::Variation { service_id, .. } => *service_id,
        }
    }

    fn feature_id(&self) -> Option<FeatureId> {
        match self {
            Self::Service { .. } => None,
            Self::Feature { feature_id, .. }
            | Self::Key { feature_id, .. }
            | Self::Variation { feature_id, .. } => Some(*feature_id),
        }
    }

    fn key_id(&self) -> Option<KeyId> {
        match self {
            Self::Service { .. } | Self::Feature { .. } => None,
            Self::Key { key_id, .. } | Self::Variation { key_id, .. } => Some(*key_id),
        }
    }

    /// Returns true if this grant covers `scope` under the actual variation.
    ///
    /// `actual` must already include ancestors (see [`ExpandedVariation`]).
    pub fn matches(&self, scope: &PermissionScope, actual: &ExpandedVariation) -> bool {
        if self.service_id() != scope.service_id {
            return false;
        }
        match self {
            Self::Service { .. } => true,
            Self::Feature { feature_id, .. } => scope.feature_id == Some(*feature_id),
            Self::Key {
                feature_id, key_id, ..
            } => scope.feature_id == Some(*feature_id) && scope.key_id == Some(*key_id),
            Self::Variation {
                feature_id,
                key_id,
                required_values,
                ..
            } => {
                scope.feature_id == Some(*feature_id)
                    && scope.key_id == Some(*key_id)
                    && required_values
                        .iter()
                        .all(|(property_id, value)| actual.contains(*property_id, value))
            }
        }
    }

    /// Returns true if this grant is reachable from `scope`, ignoring variation
    /// constraints. Only ids named on both sides are compared, so a grant deep
    /// inside a service matches a service-level scope and vice versa.
    pub fn matches_any(&self, scope: &PermissionScope) -> bool {
        fn compatible<T: PartialEq>(requested: Option<T>, granted: Option<T>) -> bool {
            match (requested, granted) {
                (Some(requested), Some(granted)) => requested == granted,
                _ => true,
            }
        }

        self.service_id() == scope.service_id
            && compatible(scope.feature_id, self.feature_id())
            && compatible(scope.key_id, self.key_id())
    }
}

/// A raw permission row from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    /// Service.
    pub service_id: ServiceId,
    /// Feature, if the grant is feature-scoped or narrower.
    #[serde(default)]
    pub feature_id: Option<FeatureId>,
    /// Key, if the grant is key-scoped or narrower.
    #[serde(default)]
    pub key_id: Option<KeyId>,
    /// Variation constraints; empty for non-variation grants.
    #[serde(default)]
    pub variation: VariationMap,
    /// Granted level.
    pub level: PermissionLevel,
}

impl TryFrom<PermissionRow> for Permission {
    type Error = CoreError;

    fn try_from(row: PermissionRow) -> CoreResult<Self> {
        let PermissionRow {
            service_id,
            feature_id,
            key_id,
            variation,
            level,
        } = row;

        match (feature_id, key_id, variation.is_empty()) {
            (None, None, true) => Ok(Self::Service { service_id, level }),
            (Some(feature_id), None, true) => Ok(Self::Feature {
                service_id,
                feature_id,
                level,
            }),
            (Some(feature_id), Some(key_id), true) => Ok(Self::Key {
                service_id,
                feature_id,
                key_id,
                level,
            }),
            (Some(feature_id), Some(key_id), false) => Ok(Self::Variation {
                service_id,
                feature_id,
                key_id,
                required_values: variation,
                level,
            }),
            (None, Some(key_id), _) => Err(CoreError::InvalidInput(format!(
                "key permission for key {key_id} has no feature"
            ))),
            (_, None, false) => Err(CoreError::InvalidInput(format!(
                "variation permission on service {service_id} has no key"
            ))),
        }
    }
}

// =============================================================================
// COLLECTION
// =============================================================================

/// All grants held by one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCollection {
    permissions: Vec<Permission>,
}

impl PermissionCollection {
    /// Creates a collection from grants.
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self { permissions }
    }

    /// Creates a collection from storage rows.
    pub fn from_rows(rows: impl IntoIterator<Item = PermissionRow>) -> CoreResult<Self> {
        let permissions = rows
            .into_iter()
            .map(Permission::try_from)
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { permissions })
    }

    /// Returns the grants.
    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Returns true if there are no grants.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Returns the highest level granted for `scope` under `variation`,
    /// defaulting to [`PermissionLevel::Viewer`].
    pub fn permission_level_for(
        &self,
        hierarchy: &Hierarchy,
        scope: &PermissionScope,
        variation: &VariationMap,
    ) -> PermissionLevel {
        let actual = ExpandedVariation::expand(hierarchy, variation);
        self.permissions
            .iter()
            .filter(|permission| permission.matches(scope, &actual))
            .map(Permission::level)
            .max()
            .unwrap_or_default()
    }

    /// Returns true if any grant is reachable under `scope`.
    pub fn has_permission_for_nested_entity(&self, scope: &PermissionScope) -> bool {
        self.permissions.iter().any(|p| p.matches_any(scope))
    }
}

// =============================================================================
// USER
// =============================================================================

/// The caller a permission question is asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// `None` for unauthenticated callers.
    pub id: Option<UserId>,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
    /// Global administrators bypass all grants.
    #[serde(default)]
    pub global_admin: bool,
    /// Grants held directly or through groups.
    #[serde(default)]
    pub permissions: PermissionCollection,
}

impl User {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns true if the caller is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }

    /// Effective level for `scope` under `variation`.
    pub fn permission_level(
        &self,
        hierarchy: &Hierarchy,
        scope: &PermissionScope,
        variation: &VariationMap,
    ) -> PermissionLevel {
        if !self.is_authenticated() {
            return PermissionLevel::Viewer;
        }
        if self.global_admin {
            return PermissionLevel::Admin;
        }
        self.permissions
            .permission_level_for(hierarchy, scope, variation)
    }

    /// Returns true if the caller holds any grant under `scope`.
    pub fn has_permission_for_nested_entity(&self, scope: &PermissionScope) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        self.global_admin || self.permissions.has_permission_for_nested_entity(scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ServiceTypeId, ValueId};
    use crate::types::{PropertyValueRow, ServiceTypePropertyRow};

    const ENV: PropertyId = PropertyId(1);
    const S: ServiceId = ServiceId(1);
    const OTHER: ServiceId = ServiceId(2);
    const F: FeatureId = FeatureId(10);
    const K: KeyId = KeyId(100);

    fn hierarchy() -> Hierarchy {
        let row = |id: u64, parent: Option<u64>, value: &str| PropertyValueRow {
            id: ValueId(id),
            property_id: ENV,
            property_name: "env".into(),
            property_display_name: "Environment".into(),
            parent_id: parent.map(ValueId),
            value: value.into(),
            archived: false,
        };
        let rows = vec![row(1, None, "prod"), row(2, None, "qa"), row(3, Some(2), "qa1")];
        let links = vec![ServiceTypePropertyRow {
            service_type_id: ServiceTypeId(1),
            property_id: ENV,
        }];
        Hierarchy::build(&rows, &links).unwrap()
    }

    fn env(value: &str) -> VariationMap {
        [(ENV, value.to_string())].into_iter().collect()
    }

    #[test]
    fn test_empty_collection_is_viewer() {
        let h = hierarchy();
        let perms = PermissionCollection::default();
        let level = perms.permission_level_for(&h, &PermissionScope::key(S, F, K), &env("qa"));
        assert_eq!(level, PermissionLevel::Viewer);
    }

    #[test]
    fn test_service_admin_scoped_to_service() {
        let h = hierarchy();
        let perms = PermissionCollection::new(vec![Permission::Service {
            service_id: S,
            level: PermissionLevel::Admin,
        }]);
        let none = VariationMap::new();

        assert_eq!(
            perms.permission_level_for(&h, &PermissionScope::feature(S, F), &none),
            PermissionLevel::Admin
        );
        assert_eq!(
            perms.permission_level_for(&h, &PermissionScope::key(S, F, K), &env("prod")),
            PermissionLevel::Admin
        );
        assert_eq!(
            perms.permission_level_for(&h, &PermissionScope::service(OTHER), &none),
            PermissionLevel::Viewer
        );
    }

    #[test]
    fn test_variation_grant_applies_to_descendants() {
        let h = hierarchy();
        let perms = PermissionCollection::new(vec![Permission::Variation {
            service_id: S,
            feature_id: F,
            key_id: K,
            required_values: env("qa"),
            level: PermissionLevel::Editor,
        }]);
        let scope = PermissionScope::key(S, F, K);

        assert_eq!(perms.permission_level_for(&h, &scope, &env("qa")), PermissionLevel::Editor);
        assert_eq!(perms.permission_level_for(&h, &scope, &env("qa1")), PermissionLevel::Editor);
        assert_eq!(perms.permission_level_for(&h, &scope, &env("prod")), PermissionLevel::Viewer);
        assert_eq!(
            perms.permission_level_for(&h, &scope, &VariationMap::new()),
            PermissionLevel::Viewer
        );
    }

    #[test]
    fn test_max_of_matches() {
        let h = hierarchy();
        let perms = PermissionCollection::new(vec![
            Permission::Feature {
                service_id: S,
                feature_id: F,
                level: PermissionLevel::Editor,
            },
            Permission::Key {
                service_id: S,
                feature_id: F,
                key_id: K,
                level: PermissionLevel::Owner,
            },
        ]);
        assert_eq!(
            perms.permission_level_for(&h, &PermissionScope::key(S, F, K), &VariationMap::new()),
            PermissionLevel::Owner
        );
        assert_eq!(
            perms.permission_level_for(&h, &PermissionScope::key(S, F, KeyId(101)), &VariationMap::new()),
            PermissionLevel::Editor
        );
    }

    #[test]
    fn test_nested_entity_reachability() {
        let perms = PermissionCollection::new(vec![Permission::Key {
            service_id: S,
            feature_id: F,
            key_id: K,
            level: PermissionLevel::Editor,
        }]);
        assert!(perms.has_permission_for_nested_entity(&PermissionScope::service(S)));
        assert!(perms.has_permission_for_nested_entity(&PermissionScope::feature(S, F)));
        assert!(!perms.has_permission_for_nested_entity(&PermissionScope::feature(S, FeatureId(11))));
        assert!(!perms.has_permission_for_nested_entity(&PermissionScope::service(OTHER)));
    }

    #[test]
    fn test_rows_map_to_variants() {
        let base = PermissionRow {
            service_id: S,
            feature_id: None,
            key_id: None,
            variation: VariationMap::new(),
            level: PermissionLevel::Editor,
        };
        let service = Permission::try_from(base.clone()).unwrap();
        assert_eq!(service.kind(), ScopeKind::Service);

        let feature = Permission::try_from(PermissionRow {
            feature_id: Some(F),
            ..base.clone()
        })
        .unwrap();
        assert_eq!(feature.kind(), ScopeKind::Feature);

        let variation = Permission::try_from(PermissionRow {
            feature_id: Some(F),
            key_id: Some(K),
            variation: env("qa"),
            ..base.clone()
        })
        .unwrap();
        assert_eq!(variation.kind(), ScopeKind::Variation);

        assert!(Permission::try_from(PermissionRow {
            key_id: Some(K),
            ..base.clone()
        })
        .is_err());
        assert!(Permission::try_from(PermissionRow {
            variation: env("qa"),
            ..base
        })
        .is_err());
    }

    #[test]
    fn test_user_levels() {
        let h = hierarchy();
        let scope = PermissionScope::service(S);
        let none = VariationMap::new();

        let grants = PermissionCollection::new(vec![Permission::Service {
            service_id: S,
            level: PermissionLevel::Owner,
        }]);

        let anonymous = User {
            permissions: grants.clone(),
            ..User::anonymous()
        };
        assert_eq!(anonymous.permission_level(&h, &scope, &none), PermissionLevel::Viewer);

        let admin = User {
            id: Some(UserId(1)),
            global_admin: true,
            ..User::default()
        };
        assert_eq!(admin.permission_level(&h, &scope, &none), PermissionLevel::Admin);

        let owner = User {
            id: Some(UserId(2)),
            permissions: grants,
            ..User::default()
        };
        assert_eq!(owner.permission_level(&h, &scope, &none), PermissionLevel::Owner);
        assert!(owner.has_permission_for_nested_entity(&scope));
    }
}
