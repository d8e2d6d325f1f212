//! Variation context canonicalization.
//!
//! A variation context is the stable id of one exact, unordered set of
//! variation value ids. This service canonicalizes sets before every cache or
//! storage access and caches both directions of the mapping.

use std::sync::Arc;

use tracing::debug;

use strata_core::ids::{ContextId, ValueId};
use strata_core::{Hierarchy, VariationMap};
use strata_traits::VariationContextStore;

use crate::cache::ContextCache;
use crate::error::EngineResult;

/// Find-or-create access to variation contexts.
pub struct VariationContextService {
    store: Arc<dyn VariationContextStore>,
    cache: ContextCache,
}

impl VariationContextService {
    /// Create a new service with the given cache bounds.
    pub fn new(
        store: Arc<dyn VariationContextStore>,
        id_capacity: usize,
        values_capacity: usize,
    ) -> Self {
        Self {
            store,
            cache: ContextCache::new(id_capacity, values_capacity),
        }
    }

    /// Returns the context id for a set of value ids, creating it if needed.
    ///
    /// The input order and duplicates are irrelevant. The storage collaborator
    /// is responsible for making concurrent creation of the same set converge
    /// on one id.
    pub async fn get_variation_context_id(
        &self,
        hierarchy: &Hierarchy,
        value_ids: &[ValueId],
    ) -> EngineResult<ContextId> {
        let canonical = canonicalize(value_ids);
        if let Some(id) = self.cache.context_id(&canonical) {
            debug!(context_id = %id, "context id cache hit");
            return Ok(id);
        }

        // Validates the set (known ids, one value per property) before any write.
        let variation = hierarchy.variation_from_ids(&canonical)?;

        let id = match self.store.find_variation_context(&canonical).await? {
            Some(id) => id,
            None => {
                let id = self.store.create_variation_context(&canonical).await?;
                debug!(context_id = %id, members = canonical.len(), "created variation context");
                id
            }
        };

        self.cache.put_context_values(id, variation);
        self.cache.put_context_id(canonical, id);
        Ok(id)
    }

    /// Returns the `property -> value` variation a context stands for.
    pub async fn get_variation_context_values(
        &self,
        hierarchy: &Hierarchy,
        id: ContextId,
    ) -> EngineResult<VariationMap> {
        if let Some(variation) = self.cache.context_values(id) {
            return Ok(variation);
        }

        debug!(context_id = %id, "context values cache miss");
        let members = canonicalize(&self.store.get_variation_context_members(id).await?);
        let variation = hierarchy.variation_from_ids(&members)?;

        self.cache.put_context_values(id, variation.clone());
        self.cache.put_context_id(members, id);
        Ok(variation)
    }

    /// Drop every cached mapping.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Sorted, duplicate-free copy of a value id set.
pub fn canonicalize(value_ids: &[ValueId]) -> Vec<ValueId> {
    let mut ids = value_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    use strata_core::ErrorKind;
    use strata_storage::InMemoryStore;
    use strata_traits::{HierarchyStore, NewVariationProperty, NewVariationPropertyValue};

    use crate::error::EngineError;

    struct Fixture {
        store: Arc<InMemoryStore>,
        hierarchy: Hierarchy,
        qa: ValueId,
        prod: ValueId,
        eu: ValueId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let env = store
            .create_variation_property(&NewVariationProperty {
                name: "env".into(),
                display_name: "Environment".into(),
            })
            .await
            .unwrap();
        let region = store
            .create_variation_property(&NewVariationProperty {
                name: "region".into(),
                display_name: "Region".into(),
            })
            .await
            .unwrap();
        let mut ids = Vec::new();
        for (property_id, value) in [(env, "qa"), (env, "prod"), (region, "eu")] {
            ids.push(
                store
                    .create_variation_property_value(&NewVariationPropertyValue {
                        property_id,
                        parent_id: None,
                        value: value.into(),
                    })
                    .await
                    .unwrap(),
            );
        }
        let rows = store.list_variation_property_values().await.unwrap();
        let hierarchy = Hierarchy::build(&rows, &[]).unwrap();
        Fixture {
            store,
            hierarchy,
            qa: ids[0],
            prod: ids[1],
            eu: ids[2],
        }
    }

    #[tokio::test]
    async fn test_order_insensitive_and_idempotent() {
        let f = fixture().await;
        let service = VariationContextService::new(f.store.clone(), 100, 100);

        let a = service
            .get_variation_context_id(&f.hierarchy, &[f.qa, f.eu])
            .await
            .unwrap();
        let b = service
            .get_variation_context_id(&f.hierarchy, &[f.eu, f.qa, f.eu])
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(f.store.context_count(), 1);

        let values = service
            .get_variation_context_values(&f.hierarchy, a)
            .await
            .unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.values().any(|v| v == "qa"));
        assert!(values.values().any(|v| v == "eu"));
    }

    #[tokio::test]
    async fn test_same_id_after_eviction() {
        let f = fixture().await;
        let service = VariationContextService::new(f.store.clone(), 1, 1);

        let first = service
            .get_variation_context_id(&f.hierarchy, &[f.qa])
            .await
            .unwrap();
        // Evicts the first entry from both capacity-one caches.
        let other = service
            .get_variation_context_id(&f.hierarchy, &[f.prod])
            .await
            .unwrap();
        assert_ne!(first, other);

        let again = service
            .get_variation_context_id(&f.hierarchy, &[f.qa])
            .await
            .unwrap();
        assert_eq!(first, again);

        service.clear_cache();
        let values = service
            .get_variation_context_values(&f.hierarchy, other)
            .await
            .unwrap();
        assert_eq!(values.values().next().map(String::as_str), Some("prod"));
        assert_eq!(f.store.context_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_set_is_a_context() {
        let f = fixture().await;
        let service = VariationContextService::new(f.store.clone(), 10, 10);
        let id = service.get_variation_context_id(&f.hierarchy, &[]).await.unwrap();
        let values = service.get_variation_context_values(&f.hierarchy, id).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_sets_not_cached() {
        let f = fixture().await;
        let service = VariationContextService::new(f.store.clone(), 10, 10);

        let err = service
            .get_variation_context_id(&f.hierarchy, &[f.qa, f.prod])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = service
            .get_variation_context_id(&f.hierarchy, &[ValueId(404)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.store.context_count(), 0);

        let err = service
            .get_variation_context_values(&f.hierarchy, ContextId(77))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_canonicalize() {
        let ids = canonicalize(&[ValueId(3), ValueId(1), ValueId(3)]);
        assert_eq!(ids, vec![ValueId(1), ValueId(3)]);
        assert!(canonicalize(&[]).is_empty());
    }
}
