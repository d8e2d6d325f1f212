//! RedbStore implementation.
//!
//! Every entity is a JSON record in a `u64`-keyed table. Uniqueness indexes
//! (property names, value strings, context member sets) are string-keyed
//! tables checked and written inside the same write transaction as the record,
//! which redb serializes, so find-or-create is atomic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
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

type Records = TableDefinition<'static, u64, &'static [u8]>;
type Index = TableDefinition<'static, &'static str, u64>;

// Table definitions
const SEQUENCES: Index = TableDefinition::new("sequences");
const PROPERTIES: Records = TableDefinition::new("variation_properties");
const PROPERTY_NAMES: Index = TableDefinition::new("variation_property_names");
const VALUES: Records = TableDefinition::new("variation_values");
const VALUE_INDEX: Index = TableDefinition::new("variation_value_index");
const SERVICE_TYPE_LINKS: Records = TableDefinition::new("service_type_links");
const CONTEXTS: Records = TableDefinition::new("variation_contexts");
const CONTEXT_INDEX: Index = TableDefinition::new("variation_context_index");
const SERVICES: Records = TableDefinition::new("services");
const SERVICE_VERSIONS: Records = TableDefinition::new("service_versions");
const CHANGESETS: Records = TableDefinition::new("changesets");
const FEATURES: Records = TableDefinition::new("features");
const KEYS: Records = TableDefinition::new("keys");
const STORED_VALUES: Records = TableDefinition::new("stored_values");
const USERS: Records = TableDefinition::new("users");
const MEMBERSHIPS: Records = TableDefinition::new("group_memberships");
const GRANTS: Records = TableDefinition::new("grants");

const GLOBAL_SEQUENCE: &str = "global";

/// Redb-based storage backend.
///
/// # Example
///
/// ```rust,ignore
/// use strata_storage::RedbStore;
///
/// let store = RedbStore::open("./strata.redb")?;
/// assert!(store.is_healthy());
/// ```
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

// =============================================================================
// TABLE HELPERS
// =============================================================================

fn load<T, R>(table: &R, id: u64) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id)? {
        Some(data) => Ok(Some(serde_json::from_slice(data.value())?)),
        None => Ok(None),
    }
}

fn load_all<T, R>(table: &R) -> StorageResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    let mut records = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        records.push(serde_json::from_slice(value.value())?);
    }
    Ok(records)
}

fn save<T: Serialize>(
    table: &mut Table<'_, u64, &'static [u8]>,
    id: u64,
    record: &T,
) -> StorageResult<()> {
    let bytes = serde_json::to_vec(record)?;
    table.insert(id, bytes.as_slice())?;
    Ok(())
}

fn next_id(txn: &WriteTransaction) -> StorageResult<u64> {
    let mut table = txn.open_table(SEQUENCES)?;
    let next = table.get(GLOBAL_SEQUENCE)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(GLOBAL_SEQUENCE, next)?;
    Ok(next)
}

fn context_key(members: &[ValueId]) -> String {
    members
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl RedbStore {
    /// Opens or creates a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Returns true if a read transaction can be started.
    pub fn is_healthy(&self) -> bool {
        self.db.begin_read().is_ok()
    }

    /// Initializes all required tables.
    fn initialize_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            for index in [SEQUENCES, PROPERTY_NAMES, VALUE_INDEX, CONTEXT_INDEX] {
                let _ = write_txn.open_table(index)?;
            }
            for records in [
                PROPERTIES,
                VALUES,
                SERVICE_TYPE_LINKS,
                CONTEXTS,
                SERVICES,
                SERVICE_VERSIONS,
                CHANGESETS,
                FEATURES,
                KEYS,
                STORED_VALUES,
                USERS,
                MEMBERSHIPS,
                GRANTS,
            ] {
                let _ = write_txn.open_table(records)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_all<T: DeserializeOwned>(&self, definition: Records) -> StorageResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(definition)?;
        load_all(&table)
    }

    fn read_one<T: DeserializeOwned>(&self, definition: Records, id: u64) -> StorageResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(definition)?;
        load(&table, id)
    }

    /// Inserts a fresh record built from a newly allocated id.
    fn insert_new<T, F>(&self, definition: Records, build: F) -> StorageResult<u64>
    where
        T: Serialize,
        F: FnOnce(u64) -> T,
    {
        let write_txn = self.db.begin_write()?;
        let id = next_id(&write_txn)?;
        {
            let mut table = write_txn.open_table(definition)?;
            save(&mut table, id, &build(id))?;
        }
        write_txn.commit()?;
        Ok(id)
    }

    fn require<T: DeserializeOwned>(
        &self,
        definition: Records,
        entity_type: &'static str,
        id: u64,
    ) -> StorageResult<T> {
        self.read_one(definition, id)?
            .ok_or_else(|| StorageError::not_found(entity_type, id))
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
        let write_txn = self.db.begin_write()?;
        let id = ServiceId(next_id(&write_txn)?);
        {
            let mut table = write_txn.open_table(SERVICES)?;
            let existing: Vec<ServiceRecord> = load_all(&table)?;
            if existing.iter().any(|s| s.name == name) {
                return Err(StorageError::duplicate("service", name));
            }
            save(
                &mut table,
                id.get(),
                &ServiceRecord {
                    id,
                    name: name.to_string(),
                    service_type_id,
                },
            )?;
        }
        write_txn.commit()?;
        Ok(id)
    }

    /// Creates a version of a service. Version numbers are unique per service.
    pub fn create_service_version(
        &self,
        service_id: ServiceId,
        version: u32,
        published: bool,
    ) -> StorageResult<ServiceVersionId> {
        self.require::<ServiceRecord>(SERVICES, "service", service_id.get())?;

        let write_txn = self.db.begin_write()?;
        let id = ServiceVersionId(next_id(&write_txn)?);
        {
            let mut table = write_txn.open_table(SERVICE_VERSIONS)?;
            let existing: Vec<ServiceVersionRecord> = load_all(&table)?;
            if existing
                .iter()
                .any(|v| v.service_id == service_id && v.version == version)
            {
                return Err(StorageError::duplicate(
                    "service version",
                    format!("{service_id}:{version}"),
                ));
            }
            save(
                &mut table,
                id.get(),
                &ServiceVersionRecord {
                    id,
                    service_id,
                    version,
                    published,
                },
            )?;
        }
        write_txn.commit()?;
        Ok(id)
    }

    /// Marks a service version as published.
    pub fn publish_service_version(&self, id: ServiceVersionId) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SERVICE_VERSIONS)?;
            let mut record: ServiceVersionRecord = load(&table, id.get())?
                .ok_or_else(|| StorageError::not_found("service version", id))?;
            record.published = true;
            save(&mut table, id.get(), &record)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Creates a feature under a service version.
    pub fn create_feature(
        &self,
        service_version_id: ServiceVersionId,
        name: &str,
    ) -> StorageResult<FeatureId> {
        self.require::<ServiceVersionRecord>(
            SERVICE_VERSIONS,
            "service version",
            service_version_id.get(),
        )?;
        let id = self.insert_new(FEATURES, |id| FeatureRecord {
            id: FeatureId(id),
            service_version_id,
            name: name.to_string(),
        })?;
        Ok(FeatureId(id))
    }

    /// Creates a key under a feature.
    pub fn create_key(
        &self,
        feature_id: FeatureId,
        name: &str,
        data_type: DataType,
    ) -> StorageResult<KeyId> {
        self.require::<FeatureRecord>(FEATURES, "feature", feature_id.get())?;
        let id = self.insert_new(KEYS, |id| KeyRecord {
            id: KeyId(id),
            feature_id,
            name: name.to_string(),
            data_type,
        })?;
        Ok(KeyId(id))
    }

    // =========================================================================
    // VALUES AND CHANGESETS
    // =========================================================================

    fn check_value_target(&self, key_id: KeyId, context_id: ContextId) -> StorageResult<()> {
        self.require::<KeyRecord>(KEYS, "key", key_id.get())?;
        self.require::<Vec<ValueId>>(CONTEXTS, "variation context", context_id.get())?;
        Ok(())
    }

    /// Closes every current value in the same slot as `slot`.
    fn close_slot(
        table: &mut Table<'_, u64, &'static [u8]>,
        slot: &StoredValue,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let values: Vec<StoredValue> = load_all(&*table)?;
        for mut existing in values {
            if existing.id != slot.id && existing.is_current() && existing.same_slot(slot) {
                existing.valid_to = Some(at);
                save(table, existing.id, &existing)?;
            }
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

        let write_txn = self.db.begin_write()?;
        {
            let now = Utc::now();
            let value = StoredValue {
                id: next_id(&write_txn)?,
                key_id,
                variation_context_id: context_id,
                data: data.into(),
                changeset_id: ChangesetId::HEAD,
                valid_from: Some(now),
                valid_to: None,
            };
            let mut table = write_txn.open_table(STORED_VALUES)?;
            Self::close_slot(&mut table, &value, now)?;
            save(&mut table, value.id, &value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Opens a new changeset.
    pub fn create_changeset(&self) -> StorageResult<ChangesetId> {
        let id = self.insert_new(CHANGESETS, |id| ChangesetRow {
            id: ChangesetId(id),
            applied_at: None,
        })?;
        Ok(ChangesetId(id))
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
        let changeset: ChangesetRow = self.require(CHANGESETS, "changeset", changeset_id.get())?;
        if changeset.is_applied() {
            return Err(StorageError::Constraint(format!(
                "changeset {changeset_id} is already applied"
            )));
        }

        let data = data.into();
        self.insert_new(STORED_VALUES, |id| StoredValue {
            id,
            key_id,
            variation_context_id: context_id,
            data,
            changeset_id,
            valid_from: None,
            valid_to: None,
        })?;
        Ok(())
    }

    /// Applies a changeset: its drafts take effect and replace current values.
    pub fn apply_changeset(&self, id: ChangesetId) -> StorageResult<DateTime<Utc>> {
        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        {
            let mut changesets = write_txn.open_table(CHANGESETS)?;
            let mut changeset: ChangesetRow = load(&changesets, id.get())?
                .ok_or_else(|| StorageError::not_found("changeset", id))?;
            if changeset.is_applied() {
                return Err(StorageError::Constraint(format!(
                    "changeset {id} is already applied"
                )));
            }

            let mut values = write_txn.open_table(STORED_VALUES)?;
            let drafts: Vec<StoredValue> = load_all::<StoredValue, _>(&values)?
                .into_iter()
                .filter(|v| v.is_draft() && v.changeset_id == id)
                .collect();

            for mut draft in drafts {
                Self::close_slot(&mut values, &draft, now)?;
                draft.valid_from = Some(now);
                save(&mut values, draft.id, &draft)?;
            }

            changeset.applied_at = Some(now);
            save(&mut changesets, id.get(), &changeset)?;
        }
        write_txn.commit()?;
        debug!(changeset_id = %id, "applied changeset");
        Ok(now)
    }

    // =========================================================================
    // USERS AND GRANTS
    // =========================================================================

    /// Creates a user.
    pub fn create_user(&self, email: Option<&str>, global_admin: bool) -> StorageResult<UserId> {
        let id = self.insert_new(USERS, |id| UserRow {
            id: UserId(id),
            email: email.map(str::to_string),
            global_admin,
        })?;
        Ok(UserId(id))
    }

    /// Creates an empty group.
    pub fn create_group(&self) -> StorageResult<GroupId> {
        let write_txn = self.db.begin_write()?;
        let id = next_id(&write_txn)?;
        write_txn.commit()?;
        Ok(GroupId(id))
    }

    /// Adds a user to a group.
    pub fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> StorageResult<()> {
        self.require::<UserRow>(USERS, "user", user_id.get())?;
        self.insert_new(MEMBERSHIPS, |_| GroupMembership { group_id, user_id })?;
        Ok(())
    }

    /// Grants a permission to a user or group.
    pub fn grant(&self, subject: GrantSubject, permission: PermissionRow) -> StorageResult<()> {
        if let GrantSubject::User(user_id) = subject {
            self.require::<UserRow>(USERS, "user", user_id.get())?;
        }
        self.insert_new(GRANTS, |_| GrantRecord {
            subject,
            permission,
        })?;
        Ok(())
    }

    // =========================================================================
    // HIERARCHY WRITES
    // =========================================================================

    fn insert_property(&self, property: &NewVariationProperty) -> StorageResult<PropertyId> {
        let write_txn = self.db.begin_write()?;
        let id = {
            let mut names = write_txn.open_table(PROPERTY_NAMES)?;
            if names.get(property.name.as_str())?.is_some() {
                return Err(StorageError::duplicate("variation property", &property.name));
            }
            let id = PropertyId(next_id(&write_txn)?);
            names.insert(property.name.as_str(), id.get())?;

            let mut table = write_txn.open_table(PROPERTIES)?;
            save(
                &mut table,
                id.get(),
                &PropertyRecord {
                    id,
                    name: property.name.clone(),
                    display_name: property.display_name.clone(),
                },
            )?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }

    fn insert_value(&self, value: &NewVariationPropertyValue) -> StorageResult<ValueId> {
        self.require::<PropertyRecord>(PROPERTIES, "variation property", value.property_id.get())?;

        let write_txn = self.db.begin_write()?;
        let id = {
            let mut table = write_txn.open_table(VALUES)?;
            if let Some(parent_id) = value.parent_id {
                let parent: ValueRecord = load(&table, parent_id.get())?
                    .ok_or_else(|| StorageError::not_found("variation value", parent_id))?;
                if parent.property_id != value.property_id {
                    return Err(StorageError::Constraint(format!(
                        "parent value {parent_id} belongs to another property"
                    )));
                }
            }

            let index_key = format!("{}:{}", value.property_id, value.value);
            let mut index = write_txn.open_table(VALUE_INDEX)?;
            if index.get(index_key.as_str())?.is_some() {
                return Err(StorageError::duplicate("variation value", index_key));
            }

            let id = ValueId(next_id(&write_txn)?);
            index.insert(index_key.as_str(), id.get())?;
            save(
                &mut table,
                id.get(),
                &ValueRecord {
                    id,
                    property_id: value.property_id,
                    parent_id: value.parent_id,
                    value: value.value.clone(),
                    archived: false,
                },
            )?;
            id
        };
        write_txn.commit()?;
        Ok(id)
    }

    fn update_archived(&self, id: ValueId, archived: bool) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(VALUES)?;
            let mut record: ValueRecord = load(&table, id.get())?
                .ok_or_else(|| StorageError::not_found("variation value", id))?;
            record.archived = archived;
            save(&mut table, id.get(), &record)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_link(&self, service_type_id: ServiceTypeId, property_id: PropertyId) -> StorageResult<()> {
        self.require::<PropertyRecord>(PROPERTIES, "variation property", property_id.get())?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SERVICE_TYPE_LINKS)?;
            let links: Vec<ServiceTypePropertyRow> = load_all(&table)?;
            if links
                .iter()
                .any(|l| l.service_type_id == service_type_id && l.property_id == property_id)
            {
                return Err(StorageError::duplicate(
                    "service type property",
                    format!("{service_type_id}:{property_id}"),
                ));
            }
            let id = next_id(&write_txn)?;
            save(
                &mut table,
                id,
                &ServiceTypePropertyRow {
                    service_type_id,
                    property_id,
                },
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn property_value_rows(&self) -> StorageResult<Vec<PropertyValueRow>> {
        let read_txn = self.db.begin_read()?;
        let properties = read_txn.open_table(PROPERTIES)?;
        let values: Vec<ValueRecord> = load_all(&read_txn.open_table(VALUES)?)?;

        values
            .iter()
            .map(|value| {
                let property: PropertyRecord = load(&properties, value.property_id.get())?
                    .ok_or_else(|| StorageError::not_found("variation property", value.property_id))?;
                Ok(value.to_row(&property))
            })
            .collect()
    }

    // =========================================================================
    // CONTEXTS
    // =========================================================================

    fn find_context(&self, value_ids: &[ValueId]) -> StorageResult<Option<ContextId>> {
        let key = context_key(&canonical_members(value_ids));
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(CONTEXT_INDEX)?;
        let found = index.get(key.as_str())?.map(|v| ContextId(v.value()));
        Ok(found)
    }

    fn find_or_create_context(&self, value_ids: &[ValueId]) -> StorageResult<ContextId> {
        let members = canonical_members(value_ids);
        let key = context_key(&members);

        let write_txn = self.db.begin_write()?;
        let id = {
            let mut index = write_txn.open_table(CONTEXT_INDEX)?;
            let existing = index.get(key.as_str())?.map(|v| ContextId(v.value()));
            match existing {
                Some(id) => id,
                None => {
                    let values = write_txn.open_table(VALUES)?;
                    for member in &members {
                        if values.get(member.get())?.is_none() {
                            return Err(StorageError::Constraint(format!(
                                "variation value {member} does not exist"
                            )));
                        }
                    }

                    let id = ContextId(next_id(&write_txn)?);
                    let mut contexts = write_txn.open_table(CONTEXTS)?;
                    save(&mut contexts, id.get(), &members)?;
                    index.insert(key.as_str(), id.get())?;
                    debug!(context_id = %id, "created variation context");
                    id
                }
            }
        };
        write_txn.commit()?;
        Ok(id)
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    fn service_version(
        &self,
        service_name: &str,
        selector: VersionSelector,
    ) -> StorageResult<Option<ServiceVersionRow>> {
        let services: Vec<ServiceRecord> = self.read_all(SERVICES)?;
        let Some(service) = services.into_iter().find(|s| s.name == service_name) else {
            return Ok(None);
        };

        let versions: Vec<ServiceVersionRecord> = self
            .read_all::<ServiceVersionRecord>(SERVICE_VERSIONS)?
            .into_iter()
            .filter(|v| v.service_id == service.id)
            .collect();

        Ok(select_version(&versions, selector).map(|v| v.to_row(&service)))
    }

    fn configuration_rows(
        &self,
        service_version_ids: &[ServiceVersionId],
        at: DateTime<Utc>,
        changeset_id: ChangesetId,
    ) -> StorageResult<Vec<ConfigurationRow>> {
        let read_txn = self.db.begin_read()?;
        let features: Vec<FeatureRecord> = load_all(&read_txn.open_table(FEATURES)?)?;
        let keys: Vec<KeyRecord> = load_all(&read_txn.open_table(KEYS)?)?;
        let values: Vec<StoredValue> = load_all(&read_txn.open_table(STORED_VALUES)?)?;

        Ok(assemble_configuration_rows(
            service_version_ids,
            &features,
            &keys,
            &values,
            at,
            changeset_id,
        ))
    }

    fn permissions_for(&self, user_id: UserId) -> StorageResult<Vec<PermissionRow>> {
        let read_txn = self.db.begin_read()?;
        let memberships: Vec<GroupMembership> = load_all(&read_txn.open_table(MEMBERSHIPS)?)?;
        let grants: Vec<GrantRecord> = load_all(&read_txn.open_table(GRANTS)?)?;
        Ok(user_permissions(user_id, &memberships, &grants))
    }
}

// =============================================================================
// TRAIT IMPLEMENTATIONS
// =============================================================================

#[async_trait]
impl HierarchyStore for RedbStore {
    async fn list_variation_property_values(&self) -> Result<Vec<PropertyValueRow>, TraitError> {
        Ok(self.property_value_rows()?)
    }

    async fn list_service_type_variation_properties(
        &self,
    ) -> Result<Vec<ServiceTypePropertyRow>, TraitError> {
        Ok(self.read_all(SERVICE_TYPE_LINKS)?)
    }

    async fn create_variation_property(
        &self,
        property: &NewVariationProperty,
    ) -> Result<PropertyId, TraitError> {
        Ok(self.insert_property(property)?)
    }

    async fn create_variation_property_value(
        &self,
        value: &NewVariationPropertyValue,
    ) -> Result<ValueId, TraitError> {
        Ok(self.insert_value(value)?)
    }

    async fn set_variation_property_value_archived(
        &self,
        id: ValueId,
        archived: bool,
    ) -> Result<(), TraitError> {
        Ok(self.update_archived(id, archived)?)
    }

    async fn link_service_type_property(
        &self,
        service_type_id: ServiceTypeId,
        property_id: PropertyId,
    ) -> Result<(), TraitError> {
        Ok(self.insert_link(service_type_id, property_id)?)
    }
}

#[async_trait]
impl VariationContextStore for RedbStore {
    async fn find_variation_context(
        &self,
        value_ids: &[ValueId],
    ) -> Result<Option<ContextId>, TraitError> {
        Ok(self.find_context(value_ids)?)
    }

    async fn create_variation_context(
        &self,
        value_ids: &[ValueId],
    ) -> Result<ContextId, TraitError> {
        Ok(self.find_or_create_context(value_ids)?)
    }

    async fn get_variation_context_members(
        &self,
        id: ContextId,
    ) -> Result<Vec<ValueId>, TraitError> {
        Ok(self.require(CONTEXTS, "variation context", id.get())?)
    }
}

#[async_trait]
impl ConfigurationStore for RedbStore {
    async fn find_service_version(
        &self,
        service_name: &str,
        selector: VersionSelector,
    ) -> Result<Option<ServiceVersionRow>, TraitError> {
        Ok(self.service_version(service_name, selector)?)
    }

    async fn get_changeset(&self, id: ChangesetId) -> Result<Option<ChangesetRow>, TraitError> {
        Ok(self.read_one(CHANGESETS, id.get())?)
    }

    async fn latest_applied_changeset(&self) -> Result<Option<ChangesetRow>, TraitError> {
        let changesets: Vec<ChangesetRow> = self.read_all(CHANGESETS)?;
        Ok(changesets
            .into_iter()
            .filter(ChangesetRow::is_applied)
            .max_by_key(|c| (c.applied_at, c.id)))
    }

    async fn fetch_configuration_rows(
        &self,
        service_version_ids: &[ServiceVersionId],
        at: DateTime<Utc>,
        changeset_id: ChangesetId,
    ) -> Result<Vec<ConfigurationRow>, TraitError> {
        Ok(self.configuration_rows(service_version_ids, at, changeset_id)?)
    }
}

#[async_trait]
impl PermissionStore for RedbStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserRow>, TraitError> {
        Ok(self.read_one(USERS, id.get())?)
    }

    async fn list_user_permissions(&self, id: UserId) -> Result<Vec<PermissionRow>, TraitError> {
        Ok(self.permissions_for(id)?)
    }
}
