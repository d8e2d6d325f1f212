//! In-memory storage backend.
//!
//! Provides a concurrent in-memory implementation of every storage trait.
//! Useful for testing and development. Data is not persisted across restarts.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use strata_core::ids::{
    ChangesetId, ContextId, FeatureId, KeyId, PropertyId, ServiceId, ServiceTypeId,
    ServiceVersionId, UserId, ValueId,
};
use strata_core::{DataType, PermissionRow, PropertyValueRow, ServiceTypePropertyRow};
use strata_traits::{
    ChangesetRow, ConfigurationRow, ConfigurationStore, HierarchyStore, NewVariationProperty,
    NewVariationPropertyValue, PermissionStore, ServiceVersionRow, TraitError, UserRow,
    VariationContextStore, VersionSelector,
};

use crate::error::{StorageError, StorageResult};
use crate::types::{
    assemble_configuration_rows, canonical_members, select_version, user_permissions,
    FeatureRecord, GrantRecord, GrantSubject, GroupId, GroupMembership, KeyRecord,
    PropertyRecord, ServiceRecord, ServiceVersionRecord, StoredValue, ValueRecord,
};

/// In-memory storage backend.
///
/// Entities live in concurrent maps. Context creation uses the map's entry
/// API, so concurrent callers introducing the same member set get one id.
///
/// # Example
///
/// ```rust
/// use strata_core::ids::ServiceTypeId;
/// use strata_storage::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// store.create_service("billing", ServiceTypeId(1)).unwrap();
/// assert_eq!(store.service_count(), 1);
/// ```
pub struct InMemoryStore {
    sequence: AtomicU64,
    properties: DashMap<PropertyId, PropertyRecord>,
    property_names: DashMap<String, PropertyId>,
    values: DashMap<ValueId, ValueRecord>,
    value_index: DashMap<(PropertyId, String), ValueId>,
    service_type_links: RwLock<Vec<ServiceTypePropertyRow>>,
    contexts: DashMap<ContextId, Vec<ValueId>>,
    context_index: DashMap<Vec<ValueId>, ContextId>,
    services: DashMap<ServiceId, ServiceRecord>,
    service_versions: DashMap<ServiceVersionId, ServiceVersionRecord>,
    changesets: DashMap<ChangesetId, ChangesetRow>,
    features: DashMap<FeatureId, FeatureRecord>,
    keys: DashMap<KeyId, KeyRecord>,
    stored_values: RwLock<Vec<StoredValue>>,
    users: DashMap<UserId, UserRow>,
    memberships: RwLock<Vec<GroupMembership>>,
    grants: RwLock<Vec<GrantRecord>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            properties: DashMap::new(),
            property_names: DashMap::new(),
            values: DashMap::new(),
            value_index: DashMap::new(),
            service_type_links: RwLock::new(Vec::new()),
            contexts: DashMap::new(),
            context_index: DashMap::new(),
            services: DashMap::new(),
            service_versions: DashMap::new(),
            changesets: DashMap::new(),
            features: DashMap::new(),
            keys: DashMap::new(),
            stored_values: RwLock::new(Vec::new()),
            users: DashMap::new(),
            memberships: RwLock::new(Vec::new()),
            grants: RwLock::new(Vec::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of variation contexts created so far.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Number of services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    // =========================================================================
    // SERVICE SEEDING
    // =========================================================================

    /// Creates a service. Names are unique.
    pub fn create_service(
        &self,
        name: &str,
        service_type_id: ServiceTypeId,
    ) -> StorageResult<ServiceId> {
        if self.services.iter().any(|s| s.name == name) {
            return Err(StorageError::duplicate("service", name));
        }
        let id = ServiceId(self.next_id());
        self.services.insert(
            id,
            ServiceRecord {
                id,
                name: name.to_string(),
                service_type_id,
            },
        );
        Ok(id)
    }

    /// Creates a version of a service. Version numbers are unique per service.
    pub fn create_service_version(
        &self,
        service_id: ServiceId,
        version: u32,
        published: bool,
    ) -> StorageResult<ServiceVersionId> {
        if !self.services.contains_key(&service_id) {
            return Err(StorageError::not_found("service", service_id));
        }
        if self
            .service_versions
            .iter()
            .any(|v| v.service_id == service_id && v.version == version)
        {
            return Err(StorageError::duplicate(
                "service version",
                format!("{service_id}:{version}"),
            ));
        }
        let id = ServiceVersionId(self.next_id());
        self.service_versions.insert(
            id,
            ServiceVersionRecord {
                id,
                service_id,
                version,
                published,
            },
        );
        Ok(id)
    }

    /// Marks a service version as published.
    pub fn publish_service_version(&self, id: ServiceVersionId) -> StorageResult<()> {
        let mut version = self
            .service_versions
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("service version", id))?;
        version.published = true;
        Ok(())
    }

    /// Creates a feature under a service version.
    pub fn create_feature(
        &self,
        service_version_id: ServiceVersionId,
        name: &str,
    ) -> StorageResult<FeatureId> {
        if !self.service_versions.contains_key(&service_version_id) {
            return Err(StorageError::not_found("service version", service_version_id));
        }
        let id = FeatureId(self.next_id());
        self.features.insert(
            id,
            FeatureRecord {
                id,
                service_version_id,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    /// Creates a key under a feature.
    pub fn create_key(
        &self,
        feature_id: FeatureId,
        name: &str,
        data_type: DataType,
    ) -> StorageResult<KeyId> {
        if !self.features.contains_key(&feature_id) {
            return Err(StorageError::not_found("feature", feature_id));
        }
        let id = KeyId(self.next_id());
        self.keys.insert(
            id,
            KeyRecord {
                id,
                feature_id,
                name: name.to_string(),
                data_type,
            },
        );
        Ok(id)
    }

    // =========================================================================
    // VALUES AND CHANGESETS
    // =========================================================================

    fn check_value_target(&self, key_id: KeyId, context_id: ContextId) -> StorageResult<()> {
        if !self.keys.contains_key(&key_id) {
            return Err(StorageError::not_found("key", key_id));
        }
        if !self.contexts.contains_key(&context_id) {
            return Err(StorageError::not_found("variation context", context_id));
        }
        Ok(())
    }

    /// Writes a value that takes effect immediately, closing the value it
    /// replaces.
    pub fn put_value(
        &self,
        key_id: KeyId,
        context_id: ContextId,
        data: impl Into<String>,
    ) -> StorageResult<()> {
        self.check_value_target(key_id, context_id)?;
        let now = Utc::now();
        let value = StoredValue {
            id: self.next_id(),
            key_id,
            variation_context_id: context_id,
            data: data.into(),
            changeset_id: ChangesetId::HEAD,
            valid_from: Some(now),
            valid_to: None,
        };

        let mut values = self.stored_values.write();
        for existing in values.iter_mut() {
            if existing.is_current() && existing.same_slot(&value) {
                existing.valid_to = Some(now);
            }
        }
        values.push(value);
        Ok(())
    }

    /// Opens a new changeset.
    pub fn create_changeset(&self) -> ChangesetId {
        let id = ChangesetId(self.next_id());
        self.changesets.insert(
            id,
            ChangesetRow {
                id,
                applied_at: None,
            },
        );
        id
    }

    /// Drafts a value in an open changeset.
    pub fn stage_value(
        &self,
        changeset_id: ChangesetId,
        key_id: KeyId,
        context_id: ContextId,
        data: impl Into<String>,
    ) -> StorageResult<()> {
        self.check_value_target(key_id, context_id)?;
        match self.changesets.get(&changeset_id) {
            None => return Err(StorageError::not_found("changeset", changeset_id)),
            Some(changeset) if changeset.is_applied() => {
                return Err(StorageError::Constraint(format!(
                    "changeset {changeset_id} is already applied"
                )))
            }
            Some(_) => {}
        }

        self.stored_values.write().push(StoredValue {
            id: self.next_id(),
            key_id,
            variation_context_id: context_id,
            data: data.into(),
            changeset_id,
            valid_from: None,
            valid_to: None,
        });
        Ok(())
    }

    /// Applies a changeset: its drafts take effect and replace current values.
    pub fn apply_changeset(&self, id: ChangesetId) -> StorageResult<DateTime<Utc>> {
        let mut changeset = self
            .changesets
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("changeset", id))?;
        if changeset.is_applied() {
            return Err(StorageError::Constraint(format!(
                "changeset {id} is already applied"
            )));
        }

        let now = Utc::now();
        let mut values = self.stored_values.write();
        let drafts: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_draft() && v.changeset_id == id)
            .map(|(i, _)| i)
            .collect();

        for &draft in &drafts {
            let slot = values[draft].clone();
            for existing in values.iter_mut() {
                if existing.is_current() && existing.same_slot(&slot) {
                    existing.valid_to = Some(now);
                }
            }
            values[draft].valid_from = Some(now);
        }

        changeset.applied_at = Some(now);
        debug!(changeset_id = %id, drafts = drafts.len(), "applied changeset");
        Ok(now)
    }

    // =========================================================================
    // USERS AND GRANTS
    // =========================================================================

    /// Creates a user.
    pub fn create_user(&self, email: Option<&str>, global_admin: bool) -> UserId {
        let id = UserId(self.next_id());
        self.users.insert(
            id,
            UserRow {
                id,
                email: email.map(str::to_string),
                global_admin,
            },
        );
        id
    }

    /// Creates an empty group.
    pub fn create_group(&self) -> GroupId {
        GroupId(self.next_id())
    }

    /// Adds a user to a group.
    pub fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> StorageResult<()> {
        if !self.users.contains_key(&user_id) {
            return Err(StorageError::not_found("user", user_id));
        }
        self.memberships
            .write()
            .push(GroupMembership { group_id, user_id });
        Ok(())
    }

    /// Grants a permission to a user or group.
    pub fn grant(&self, subject: GrantSubject, permission: PermissionRow) -> StorageResult<()> {
        if let GrantSubject::User(user_id) = subject {
            if !self.users.contains_key(&user_id) {
                return Err(StorageError::not_found("user", user_id));
            }
        }
        self.grants.write().push(GrantRecord {
            subject,
            permission,
        });
        Ok(())
    }
}

// =============================================================================
// HIERARCHY STORE
// =============================================================================

#[async_trait]
impl HierarchyStore for InMemoryStore {
    async fn list_variation_property_values(&self) -> Result<Vec<PropertyValueRow>, TraitError> {
        let mut values: Vec<ValueRecord> = self.values.iter().map(|v| v.clone()).collect();
        values.sort_by_key(|v| v.id);

        values
            .iter()
            .map(|value| {
                let property = self
                    .properties
                    .get(&value.property_id)
                    .ok_or_else(|| StorageError::not_found("variation property", value.property_id))?;
                Ok(value.to_row(&property))
            })
            .collect::<StorageResult<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn list_service_type_variation_properties(
        &self,
    ) -> Result<Vec<ServiceTypePropertyRow>, TraitError> {
        Ok(self.service_type_links.read().clone())
    }

    async fn create_variation_property(
        &self,
        property: &NewVariationProperty,
    ) -> Result<PropertyId, TraitError> {
        match self.property_names.entry(property.name.clone()) {
            Entry::Occupied(_) => {
                Err(StorageError::duplicate("variation property", &property.name).into())
            }
            Entry::Vacant(entry) => {
                let id = PropertyId(self.next_id());
                self.properties.insert(
                    id,
                    PropertyRecord {
                        id,
                        name: property.name.clone(),
                        display_name: property.display_name.clone(),
                    },
                );
                entry.insert(id);
                Ok(id)
            }
        }
    }

    async fn create_variation_property_value(
        &self,
        value: &NewVariationPropertyValue,
    ) -> Result<ValueId, TraitError> {
        if !self.properties.contains_key(&value.property_id) {
            return Err(StorageError::not_found("variation property", value.property_id).into());
        }
        if let Some(parent_id) = value.parent_id {
            let parent = self
                .values
                .get(&parent_id)
                .ok_or_else(|| StorageError::not_found("variation value", parent_id))?;
            if parent.property_id != value.property_id {
                return Err(StorageError::Constraint(format!(
                    "parent value {parent_id} belongs to another property"
                ))
                .into());
            }
        }

        match self
            .value_index
            .entry((value.property_id, value.value.clone()))
        {
            Entry::Occupied(_) => Err(StorageError::duplicate(
                "variation value",
                format!("{}={}", value.property_id, value.value),
            )
            .into()),
            Entry::Vacant(entry) => {
                let id = ValueId(self.next_id());
                self.values.insert(
                    id,
                    ValueRecord {
                        id,
                        property_id: value.property_id,
                        parent_id: value.parent_id,
                        value: value.value.clone(),
                        archived: false,
                    },
                );
                entry.insert(id);
                Ok(id)
            }
        }
    }

    async fn set_variation_property_value_archived(
        &self,
        id: ValueId,
        archived: bool,
    ) -> Result<(), TraitError> {
        let mut value = self
            .values
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("variation value", id))?;
        value.archived = archived;
        Ok(())
    }

    async fn link_service_type_property(
        &self,
        service_type_id: ServiceTypeId,
        property_id: PropertyId,
    ) -> Result<(), TraitError> {
        if !self.properties.contains_key(&property_id) {
            return Err(StorageError::not_found("variation property", property_id).into());
        }
        let mut links = self.service_type_links.write();
        if links
            .iter()
            .any(|l| l.service_type_id == service_type_id && l.property_id == property_id)
        {
            return Err(StorageError::duplicate(
                "service type property",
                format!("{service_type_id}:{property_id}"),
            )
            .into());
        }
        links.push(ServiceTypePropertyRow {
            service_type_id,
            property_id,
        });
        Ok(())
    }
}

// =============================================================================
// VARIATION CONTEXT STORE
// =============================================================================

#[async_trait]
impl VariationContextStore for InMemoryStore {
    async fn find_variation_context(
        &self,
        value_ids: &[ValueId],
    ) -> Result<Option<ContextId>, TraitError> {
        let members = canonical_members(value_ids);
        Ok(self.context_index.get(&members).map(|id| *id))
    }

    async fn create_variation_context(
        &self,
        value_ids: &[ValueId],
    ) -> Result<ContextId, TraitError> {
        let members = canonical_members(value_ids);
        if let Some(missing) = members.iter().find(|id| !self.values.contains_key(*id)) {
            return Err(StorageError::Constraint(format!(
                "variation value {missing} does not exist"
            ))
            .into());
        }

        let id = match self.context_index.entry(members) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = ContextId(self.next_id());
                self.contexts.insert(id, entry.key().clone());
                entry.insert(id);
                debug!(context_id = %id, "created variation context");
                id
            }
        };
        Ok(id)
    }

    async fn get_variation_context_members(
        &self,
        id: ContextId,
    ) -> Result<Vec<ValueId>, TraitError> {
        self.contexts
            .get(&id)
            .map(|members| members.clone())
            .ok_or_else(|| StorageError::not_found("variation context", id).into())
    }
}

// =============================================================================
// CONFIGURATION STORE
// =============================================================================

#[async_trait]
impl ConfigurationStore for InMemoryStore {
    async fn find_service_version(
        &self,
        service_name: &str,
        selector: VersionSelector,
    ) -> Result<Option<ServiceVersionRow>, TraitError> {
        let Some(service) = self
            .services
            .iter()
            .find(|s| s.name == service_name)
            .map(|s| s.clone())
        else {
            return Ok(None);
        };

        let versions: Vec<ServiceVersionRecord> = self
            .service_versions
            .iter()
            .filter(|v| v.service_id == service.id)
            .map(|v| v.clone())
            .collect();

        Ok(select_version(&versions, selector).map(|v| v.to_row(&service)))
    }

    async fn get_changeset(&self, id: ChangesetId) -> Result<Option<ChangesetRow>, TraitError> {
        Ok(self.changesets.get(&id).map(|c| c.clone()))
    }

    async fn latest_applied_changeset(&self) -> Result<Option<ChangesetRow>, TraitError> {
        Ok(self
            .changesets
            .iter()
            .filter(|c| c.is_applied())
            .max_by_key(|c| (c.applied_at, c.id))
            .map(|c| c.clone()))
    }

    async fn fetch_configuration_rows(
        &self,
        service_version_ids: &[ServiceVersionId],
        at: DateTime<Utc>,
        changeset_id: ChangesetId,
    ) -> Result<Vec<ConfigurationRow>, TraitError> {
        let features: Vec<FeatureRecord> = self.features.iter().map(|f| f.clone()).collect();
        let keys: Vec<KeyRecord> = self.keys.iter().map(|k| k.clone()).collect();
        let values = self.stored_values.read();

        Ok(assemble_configuration_rows(
            service_version_ids,
            &features,
            &keys,
            &values,
            at,
            changeset_id,
        ))
    }
}

// =============================================================================
// PERMISSION STORE
// =============================================================================

#[async_trait]
impl PermissionStore for InMemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserRow>, TraitError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn list_user_permissions(&self, id: UserId) -> Result<Vec<PermissionRow>, TraitError> {
        let memberships = self.memberships.read();
        let grants = self.grants.read();
        Ok(user_permissions(id, memberships.iter(), grants.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn env_tree(store: &InMemoryStore) -> (PropertyId, ValueId, ValueId) {
        let env = store
            .create_variation_property(&NewVariationProperty {
                name: "env".into(),
                display_name: "Environment".into(),
            })
            .await
            .unwrap();
        let qa = store
            .create_variation_property_value(&NewVariationPropertyValue {
                property_id: env,
                parent_id: None,
                value: "qa".into(),
            })
            .await
            .unwrap();
        let qa1 = store
            .create_variation_property_value(&NewVariationPropertyValue {
                property_id: env,
                parent_id: Some(qa),
                value: "qa1".into(),
            })
            .await
            .unwrap();
        (env, qa, qa1)
    }

    #[tokio::test]
    async fn test_hierarchy_rows_parent_first() {
        let store = InMemoryStore::new();
        let (env, qa, qa1) = env_tree(&store).await;

        let rows = store.list_variation_property_values().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, qa);
        assert_eq!(rows[1].id, qa1);
        assert_eq!(rows[1].parent_id, Some(qa));
        assert_eq!(rows[1].property_name, "env");
        assert_eq!(rows[0].property_id, env);
    }

    #[tokio::test]
    async fn test_duplicate_property_and_value_rejected() {
        let store = InMemoryStore::new();
        let (env, _, _) = env_tree(&store).await;

        let err = store
            .create_variation_property(&NewVariationProperty {
                name: "env".into(),
                display_name: "again".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TraitError::AlreadyExists(_)));

        let err = store
            .create_variation_property_value(&NewVariationPropertyValue {
                property_id: env,
                parent_id: None,
                value: "qa".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TraitError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_cross_property_parent_rejected() {
        let store = InMemoryStore::new();
        let (_, qa, _) = env_tree(&store).await;
        let region = store
            .create_variation_property(&NewVariationProperty {
                name: "region".into(),
                display_name: "Region".into(),
            })
            .await
            .unwrap();

        let err = store
            .create_variation_property_value(&NewVariationPropertyValue {
                property_id: region,
                parent_id: Some(qa),
                value: "us".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TraitError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_context_creation_is_idempotent() {
        let store = InMemoryStore::new();
        let (_, qa, qa1) = env_tree(&store).await;

        let first = store.create_variation_context(&[qa1, qa]).await.unwrap();
        let second = store.create_variation_context(&[qa, qa1]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.find_variation_context(&[qa, qa1]).await.unwrap(), Some(first));
        assert_eq!(store.get_variation_context_members(first).await.unwrap(), vec![qa, qa1]);
        assert_eq!(store.context_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_context_creation_single_id() {
        let store = Arc::new(InMemoryStore::new());
        let (_, qa, qa1) = env_tree(&store).await;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let ids = if i % 2 == 0 { vec![qa, qa1] } else { vec![qa1, qa] };
                tokio::spawn(async move { store.create_variation_context(&ids).await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.context_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_context_members_not_found() {
        let store = InMemoryStore::new();
        let err = store
            .get_variation_context_members(ContextId(99))
            .await
            .unwrap_err();
        assert!(matches!(err, TraitError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_value_replaces_current() {
        let store = InMemoryStore::new();
        let service = store.create_service("billing", ServiceTypeId(1)).unwrap();
        let version = store.create_service_version(service, 1, true).unwrap();
        let feature = store.create_feature(version, "checkout").unwrap();
        let key = store.create_key(feature, "limit", DataType::Integer).unwrap();
        let default = store.create_variation_context(&[]).await.unwrap();

        store.put_value(key, default, "10").unwrap();
        store.put_value(key, default, "20").unwrap();

        let rows = store
            .fetch_configuration_rows(&[version], Utc::now(), ChangesetId::HEAD)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, "20");
        assert_eq!(rows[0].feature_name, "checkout");
    }

    #[tokio::test]
    async fn test_changeset_lifecycle() {
        let store = InMemoryStore::new();
        let service = store.create_service("billing", ServiceTypeId(1)).unwrap();
        let version = store.create_service_version(service, 1, true).unwrap();
        let feature = store.create_feature(version, "checkout").unwrap();
        let key = store.create_key(feature, "limit", DataType::Integer).unwrap();
        let default = store.create_variation_context(&[]).await.unwrap();
        store.put_value(key, default, "10").unwrap();

        let changeset = store.create_changeset();
        store.stage_value(changeset, key, default, "30").unwrap();

        let head = store
            .fetch_configuration_rows(&[version], Utc::now(), ChangesetId::HEAD)
            .await
            .unwrap();
        assert_eq!(head[0].data, "10");

        let draft = store
            .fetch_configuration_rows(&[version], Utc::now(), changeset)
            .await
            .unwrap();
        assert_eq!(draft.len(), 1);
        assert_eq!(draft[0].data, "30");

        let applied_at = store.apply_changeset(changeset).unwrap();
        let latest = store.latest_applied_changeset().await.unwrap().unwrap();
        assert_eq!(latest.id, changeset);

        let at_apply = store
            .fetch_configuration_rows(&[version], applied_at, changeset)
            .await
            .unwrap();
        assert_eq!(at_apply.len(), 1);
        assert_eq!(at_apply[0].data, "30");

        assert!(store.apply_changeset(changeset).is_err());
    }

    #[tokio::test]
    async fn test_find_service_version() {
        let store = InMemoryStore::new();
        let service = store.create_service("billing", ServiceTypeId(3)).unwrap();
        store.create_service_version(service, 1, true).unwrap();
        store.create_service_version(service, 2, false).unwrap();

        let latest = store
            .find_service_version("billing", VersionSelector::Latest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, 2);
        assert!(!latest.published);
        assert_eq!(latest.service_type_id, ServiceTypeId(3));

        let exact = store
            .find_service_version("billing", VersionSelector::Exact(1))
            .await
            .unwrap()
            .unwrap();
        assert!(exact.published);

        assert!(store
            .find_service_version("missing", VersionSelector::Latest)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_user_permissions_through_groups() {
        let store = InMemoryStore::new();
        let user = store.create_user(Some("dev@example.com"), false);
        let group = store.create_group();
        store.add_group_member(group, user).unwrap();
        store
            .grant(
                GrantSubject::Group(group),
                PermissionRow {
                    service_id: ServiceId(1),
                    feature_id: None,
                    key_id: None,
                    variation: Default::default(),
                    level: strata_core::PermissionLevel::Owner,
                },
            )
            .unwrap();

        let rows = store.list_user_permissions(user).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, strata_core::PermissionLevel::Owner);
        assert!(store.get_user(user).await.unwrap().is_some());
    }
}
