//! Read-through, write-invalidate access to the variation hierarchy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use strata_core::ids::{PropertyId, ServiceTypeId, ValueId};
use strata_core::{Hierarchy, PropertyValueRow, ServiceTypePropertyRow};
use strata_traits::{HierarchyStore, NewVariationProperty, NewVariationPropertyValue};

use crate::cache::HierarchyCache;
use crate::error::{EngineError, EngineResult};

/// Placeholder id for the value a trial build adds.
const PROPOSED_VALUE_ID: ValueId = ValueId(u64::MAX);

/// Owns the cached hierarchy snapshot and every structural write.
///
/// Writes are validated against a trial build of the current rows plus the
/// proposed change, so a value or link that would break the hierarchy (for
/// example by exhausting a service type's rank bits) is rejected before it
/// reaches storage.
pub struct HierarchyService {
    store: Arc<dyn HierarchyStore>,
    cache: HierarchyCache,
}

impl HierarchyService {
    /// Create a new service.
    pub fn new(store: Arc<dyn HierarchyStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: HierarchyCache::new(ttl),
        }
    }

    /// Current hierarchy snapshot, rebuilt from storage on miss or expiry.
    pub async fn get(&self) -> EngineResult<Arc<Hierarchy>> {
        if let Some(hierarchy) = self.cache.get() {
            return Ok(hierarchy);
        }

        let generation = self.cache.generation();
        debug!(generation, "hierarchy cache miss, rebuilding");
        let (values, links) = self.load_rows().await?;
        let hierarchy = Arc::new(Hierarchy::build(&values, &links)?);

        if !self.cache.store(hierarchy.clone(), generation) {
            debug!("hierarchy invalidated during rebuild, snapshot not cached");
        }
        Ok(hierarchy)
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        self.cache.invalidate();
        info!("variation hierarchy cache invalidated");
    }

    // =========================================================================
    // STRUCTURAL WRITES
    // =========================================================================

    /// Create a variation property.
    pub async fn create_property(&self, property: &NewVariationProperty) -> EngineResult<PropertyId> {
        if property.name.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "variation property name must not be empty".into(),
            ));
        }
        let id = self.store.create_variation_property(property).await?;
        self.invalidate();
        Ok(id)
    }

    /// Create a value under a property, optionally beneath a parent value.
    ///
    /// The parent must not be archived.
    pub async fn create_value(&self, value: &NewVariationPropertyValue) -> EngineResult<ValueId> {
        if value.value.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "variation value must not be empty".into(),
            ));
        }
        if strata_core::is_any(&value.value) {
            return Err(EngineError::InvalidInput(format!(
                "'{}' is reserved as the wildcard value",
                value.value
            )));
        }

        let (mut values, links) = self.load_rows().await?;
        if let Some(parent_id) = value.parent_id {
            let parent = values
                .iter()
                .find(|row| row.id == parent_id)
                .ok_or_else(|| EngineError::not_found("variation value", parent_id))?;
            if parent.archived {
                warn!(%parent_id, "rejected child of archived value");
                return Err(EngineError::InvalidOperation(format!(
                    "parent value '{}' is archived",
                    parent.value
                )));
            }
        }

        let (property_name, property_display_name) = values
            .iter()
            .find(|row| row.property_id == value.property_id)
            .map(|row| (row.property_name.clone(), row.property_display_name.clone()))
            .unwrap_or_else(|| {
                let placeholder = format!("#{}", value.property_id);
                (placeholder.clone(), placeholder)
            });
        values.push(PropertyValueRow {
            id: PROPOSED_VALUE_ID,
            property_id: value.property_id,
            property_name,
            property_display_name,
            parent_id: value.parent_id,
            value: value.value.clone(),
            archived: false,
        });
        let affected = links
            .iter()
            .filter(|link| link.property_id == value.property_id)
            .map(|link| link.service_type_id);
        trial_build(&values, &links, affected)?;

        let id = self.store.create_variation_property_value(value).await?;
        self.invalidate();
        Ok(id)
    }

    /// Set or clear a value's archived flag.
    pub async fn set_archived(&self, id: ValueId, archived: bool) -> EngineResult<()> {
        self.store
            .set_variation_property_value_archived(id, archived)
            .await?;
        self.invalidate();
        Ok(())
    }

    /// Append a property to a service type's priority order.
    pub async fn link_service_type_property(
        &self,
        service_type_id: ServiceTypeId,
        property_id: PropertyId,
    ) -> EngineResult<()> {
        let (values, mut links) = self.load_rows().await?;
        links.push(ServiceTypePropertyRow {
            service_type_id,
            property_id,
        });
        trial_build(&values, &links, [service_type_id])?;

        self.store
            .link_service_type_property(service_type_id, property_id)
            .await?;
        self.invalidate();
        Ok(())
    }

    async fn load_rows(&self) -> EngineResult<(Vec<PropertyValueRow>, Vec<ServiceTypePropertyRow>)> {
        let values = self.store.list_variation_property_values().await?;
        let links = self.store.list_service_type_variation_properties().await?;
        Ok((values, links))
    }
}

/// Builds the proposed rows and checks the rank bits of the service types a
/// write touches. Service types already over the limit elsewhere do not block
/// unrelated writes.
fn trial_build(
    values: &[PropertyValueRow],
    links: &[ServiceTypePropertyRow],
    affected: impl IntoIterator<Item = ServiceTypeId>,
) -> EngineResult<()> {
    let trial = Hierarchy::build(values, links)?;
    for service_type_id in affected {
        trial.check_rank_bits(service_type_id)?;
    }
    Ok(())
}
