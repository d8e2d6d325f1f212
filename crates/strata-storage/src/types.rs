//! Core storage types.
//!
//! This module defines the records kept by the storage backends and the
//! visibility rules both backends share.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::ids::{
    ChangesetId, ContextId, FeatureId, KeyId, PropertyId, ServiceId, ServiceTypeId,
    ServiceVersionId, UserId, ValueId,
};
use strata_core::{DataType, PermissionRow, PropertyValueRow};
use strata_traits::{ConfigurationRow, ServiceVersionRow, VersionSelector};

// =============================================================================
// HIERARCHY RECORDS
// =============================================================================

/// A stored variation property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Property id.
    pub id: PropertyId,
    /// Unique name.
    pub name: String,
    /// Display name.
    pub display_name: String,
}

/// A stored variation property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    /// Value id.
    pub id: ValueId,
    /// Owning property.
    pub property_id: PropertyId,
    /// Parent value.
    pub parent_id: Option<ValueId>,
    /// Value string.
    pub value: String,
    /// Archived flag.
    pub archived: bool,
}

impl ValueRecord {
    /// Joins the value with its property into a hierarchy row.
    pub fn to_row(&self, property: &PropertyRecord) -> PropertyValueRow {
        PropertyValueRow {
            id: self.id,
            property_id: self.property_id,
            property_name: property.name.clone(),
            property_display_name: property.display_name.clone(),
            parent_id: self.parent_id,
            value: self.value.clone(),
            archived: self.archived,
        }
    }
}

// =============================================================================
// SERVICE RECORDS
// =============================================================================

/// A stored service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service id.
    pub id: ServiceId,
    /// Unique name.
    pub name: String,
    /// Service type.
    pub service_type_id: ServiceTypeId,
}

/// A stored service version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVersionRecord {
    /// Service version id.
    pub id: ServiceVersionId,
    /// Owning service.
    pub service_id: ServiceId,
    /// Version number, unique per service.
    pub version: u32,
    /// Published flag.
    pub published: bool,
}

impl ServiceVersionRecord {
    /// Joins the version with its service into a version row.
    pub fn to_row(&self, service: &ServiceRecord) -> ServiceVersionRow {
        ServiceVersionRow {
            id: self.id,
            service_id: service.id,
            service_name: service.name.clone(),
            service_type_id: service.service_type_id,
            version: self.version,
            published: self.published,
        }
    }
}

/// A stored feature of a service version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Feature id.
    pub id: FeatureId,
    /// Owning service version.
    pub service_version_id: ServiceVersionId,
    /// Feature name.
    pub name: String,
}

/// A stored key of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key id.
    pub id: KeyId,
    /// Owning feature.
    pub feature_id: FeatureId,
    /// Key name.
    pub name: String,
    /// Declared data type.
    pub data_type: DataType,
}

/// A stored key value.
///
/// Applied values carry the validity window `[valid_from, valid_to)`. Drafts
/// have no `valid_from` and are only visible to their own changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Row id, increasing with creation.
    pub id: u64,
    /// Key the value belongs to.
    pub key_id: KeyId,
    /// Variation context the value is scoped to.
    pub variation_context_id: ContextId,
    /// Raw payload.
    pub data: String,
    /// Changeset that introduced the value, `HEAD` for direct writes.
    pub changeset_id: ChangesetId,
    /// Start of validity, `None` while drafted.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity, `None` while current.
    pub valid_to: Option<DateTime<Utc>>,
}

impl StoredValue {
    /// Returns true for values not yet applied.
    pub fn is_draft(&self) -> bool {
        self.valid_from.is_none()
    }

    /// Returns true for applied values still in effect.
    pub fn is_current(&self) -> bool {
        self.valid_from.is_some() && self.valid_to.is_none()
    }

    /// Returns true if the value is visible at `at` when reading `changeset_id`.
    pub fn is_visible(&self, at: DateTime<Utc>, changeset_id: ChangesetId) -> bool {
        match self.valid_from {
            Some(from) => from <= at && self.valid_to.map_or(true, |to| at < to),
            None => !changeset_id.is_head() && self.changeset_id == changeset_id,
        }
    }

    /// Returns true if both values target the same key and context.
    pub fn same_slot(&self, other: &StoredValue) -> bool {
        self.key_id == other.key_id && self.variation_context_id == other.variation_context_id
    }
}

// =============================================================================
// PERMISSION RECORDS
// =============================================================================

/// Group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Holder of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GrantSubject {
    /// A single user.
    User(UserId),
    /// Every member of a group.
    Group(GroupId),
}

/// A stored grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    /// Holder.
    pub subject: GrantSubject,
    /// The granted permission.
    pub permission: PermissionRow,
}

/// A stored group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    /// Group.
    pub group_id: GroupId,
    /// Member.
    pub user_id: UserId,
}

// =============================================================================
// SHARED QUERIES
// =============================================================================

/// Picks the version matching `selector` among one service's versions.
pub(crate) fn select_version<'a, I>(versions: I, selector: VersionSelector) -> Option<&'a ServiceVersionRecord>
where
    I: IntoIterator<Item = &'a ServiceVersionRecord>,
{
    let mut versions = versions.into_iter();
    match selector {
        VersionSelector::Latest => versions.max_by_key(|v| v.version),
        VersionSelector::Exact(n) => versions.find(|v| v.version == n),
    }
}

/// Flattens features, keys and values into configuration rows.
///
/// Rows follow the order of `version_ids`, then feature id, key id and value id.
/// A visible draft shadows applied values for the same key and context.
pub(crate) fn assemble_configuration_rows(
    version_ids: &[ServiceVersionId],
    features: &[FeatureRecord],
    keys: &[KeyRecord],
    values: &[StoredValue],
    at: DateTime<Utc>,
    changeset_id: ChangesetId,
) -> Vec<ConfigurationRow> {
    let mut visible: Vec<&StoredValue> = values
        .iter()
        .filter(|v| v.is_visible(at, changeset_id))
        .collect();

    let drafted: HashSet<(KeyId, ContextId)> = visible
        .iter()
        .filter(|v| v.is_draft())
        .map(|v| (v.key_id, v.variation_context_id))
        .collect();
    visible.retain(|v| v.is_draft() || !drafted.contains(&(v.key_id, v.variation_context_id)));
    visible.sort_by_key(|v| v.id);

    let mut by_key: HashMap<KeyId, Vec<&StoredValue>> = HashMap::new();
    for value in visible {
        by_key.entry(value.key_id).or_default().push(value);
    }

    let mut rows = Vec::new();
    for version_id in version_ids {
        let mut version_features: Vec<&FeatureRecord> = features
            .iter()
            .filter(|f| f.service_version_id == *version_id)
            .collect();
        version_features.sort_by_key(|f| f.id);

        for feature in version_features {
            let mut feature_keys: Vec<&KeyRecord> =
                keys.iter().filter(|k| k.feature_id == feature.id).collect();
            feature_keys.sort_by_key(|k| k.id);

            for key in feature_keys {
                for value in by_key.get(&key.id).into_iter().flatten() {
                    rows.push(ConfigurationRow {
                        service_version_id: *version_id,
                        feature_id: feature.id,
                        feature_name: feature.name.clone(),
                        key_id: key.id,
                        key_name: key.name.clone(),
                        data_type: key.data_type,
                        variation_context_id: value.variation_context_id,
                        data: value.data.clone(),
                    });
                }
            }
        }
    }
    rows
}

/// Collects the grants reaching `user_id` directly or through its groups.
pub(crate) fn user_permissions<'a>(
    user_id: UserId,
    memberships: impl IntoIterator<Item = &'a GroupMembership>,
    grants: impl IntoIterator<Item = &'a GrantRecord>,
) -> Vec<PermissionRow> {
    let groups: HashSet<GroupId> = memberships
        .into_iter()
        .filter(|m| m.user_id == user_id)
        .map(|m| m.group_id)
        .collect();

    grants
        .into_iter()
        .filter(|grant| match grant.subject {
            GrantSubject::User(id) => id == user_id,
            GrantSubject::Group(group) => groups.contains(&group),
        })
        .map(|grant| grant.permission.clone())
        .collect()
}

/// Canonical form of a context member set: sorted, without duplicates.
pub(crate) fn canonical_members(value_ids: &[ValueId]) -> Vec<ValueId> {
    let mut ids = value_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
