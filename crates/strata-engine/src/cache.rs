//! In-memory caches for the engine.
//!
//! The hierarchy cache holds a single snapshot slot with a time-to-live. The
//! context caches are entry-bounded LRU maps in both directions. Neither cache
//! ever stores a failure.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use strata_core::ids::{ContextId, ValueId};
use strata_core::{Hierarchy, VariationMap};

// =============================================================================
// HIERARCHY CACHE
// =============================================================================

/// Single-slot hierarchy snapshot cache with staleness tracking.
///
/// Invalidation bumps a generation counter. A loader records the generation
/// before reading storage and only publishes its snapshot if no invalidation
/// happened meanwhile, so a rebuild racing a structural write cannot
/// reinstate pre-write data.
pub struct HierarchyCache {
    slot: RwLock<Option<CachedHierarchy>>,
    generation: AtomicU64,
    ttl: Duration,
}

struct CachedHierarchy {
    hierarchy: Arc<Hierarchy>,
    loaded_at: Instant,
}

impl HierarchyCache {
    /// Create a new hierarchy cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Get the cached snapshot unless it is missing or expired.
    pub fn get(&self) -> Option<Arc<Hierarchy>> {
        self.slot
            .read()
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < self.ttl)
            .map(|c| c.hierarchy.clone())
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Publish a snapshot loaded at `generation`.
    ///
    /// Returns false and drops the snapshot if the cache was invalidated since.
    pub fn store(&self, hierarchy: Arc<Hierarchy>, generation: u64) -> bool {
        let mut slot = self.slot.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        *slot = Some(CachedHierarchy {
            hierarchy,
            loaded_at: Instant::now(),
        });
        true
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
    }
}

// =============================================================================
// CONTEXT CACHE
// =============================================================================

/// Bidirectional variation context cache.
///
/// Keys of the id direction are canonical (sorted, deduplicated) value id sets.
pub struct ContextCache {
    ids: Mutex<LruCache<Vec<ValueId>, ContextId>>,
    values: Mutex<LruCache<ContextId, VariationMap>>,
}

fn capacity(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries.max(1)).unwrap_or(NonZeroUsize::MIN)
}

impl ContextCache {
    /// Create a new cache with the given entry bounds.
    pub fn new(id_capacity: usize, values_capacity: usize) -> Self {
        Self {
            ids: Mutex::new(LruCache::new(capacity(id_capacity))),
            values: Mutex::new(LruCache::new(capacity(values_capacity))),
        }
    }

    /// Look up the context id of a canonical value id set.
    pub fn context_id(&self, value_ids: &[ValueId]) -> Option<ContextId> {
        self.ids.lock().get(value_ids).copied()
    }

    /// Look up the variation of a context.
    pub fn context_values(&self, id: ContextId) -> Option<VariationMap> {
        self.values.lock().get(&id).cloned()
    }

    /// Record a canonical id set to context mapping.
    pub fn put_context_id(&self, value_ids: Vec<ValueId>, id: ContextId) {
        self.ids.lock().put(value_ids, id);
    }

    /// Record a context's variation.
    pub fn put_context_values(&self, id: ContextId, variation: VariationMap) {
        self.values.lock().put(id, variation);
    }

    /// Number of cached id set entries.
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    /// Check if the id direction is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    /// Clear both directions.
    pub fn clear(&self) {
        self.ids.lock().clear();
        self.values.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use strata_core::ids::PropertyId;

    #[test]
    fn test_hierarchy_cache_ttl() {
        let cache = HierarchyCache::new(Duration::ZERO);
        let generation = cache.generation();
        assert!(cache.store(Arc::new(Hierarchy::default()), generation));
        // Zero TTL means every entry is already stale.
        assert!(cache.get().is_none());

        let cache = HierarchyCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());
        let generation = cache.generation();
        assert!(cache.store(Arc::new(Hierarchy::default()), generation));
        assert!(cache.get().is_some());
    }

    #[test]
    fn test_invalidate_rejects_stale_store() {
        let cache = HierarchyCache::new(Duration::from_secs(60));
        let generation = cache.generation();
        cache.invalidate();
        assert!(!cache.store(Arc::new(Hierarchy::default()), generation));
        assert!(cache.get().is_none());

        let generation = cache.generation();
        assert!(cache.store(Arc::new(Hierarchy::default()), generation));
        cache.invalidate();
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_context_cache_eviction() {
        let cache = ContextCache::new(1, 1);
        cache.put_context_id(vec![ValueId(1)], ContextId(10));
        cache.put_context_id(vec![ValueId(2)], ContextId(20));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.context_id(&[ValueId(1)]), None);
        assert_eq!(cache.context_id(&[ValueId(2)]), Some(ContextId(20)));

        let variation: VariationMap = [(PropertyId(1), "qa".to_string())].into_iter().collect();
        cache.put_context_values(ContextId(10), variation.clone());
        assert_eq!(cache.context_values(ContextId(10)), Some(variation));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.context_values(ContextId(10)), None);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = ContextCache::new(0, 0);
        cache.put_context_id(vec![], ContextId(1));
        assert_eq!(cache.context_id(&[]), Some(ContextId(1)));
    }
}
