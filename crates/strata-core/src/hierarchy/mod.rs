//! Variation hierarchy.
//!
//! The hierarchy is an immutable snapshot of every variation property, the tree
//! of values under each property, and the per-service-type priority order of
//! properties. Values live in a flat arena keyed by [`ValueId`]; parent and child
//! links are id references.
//!
//! Snapshots are built wholesale from storage rows with [`Hierarchy::build`] and
//! replaced, never patched, when the underlying rows change.

mod builder;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::ids::{PropertyId, ServiceTypeId, ValueId};
use crate::types::{is_any, VariationMap, VariationNameMap};

pub use builder::RANK_BITS;

// =============================================================================
// NODES
// =============================================================================

/// One value in a property's value tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariationPropertyValue {
    /// Value id.
    pub id: ValueId,
    /// Owning property.
    pub property_id: PropertyId,
    /// The value string, unique within its property.
    pub value: String,
    /// Archived values resolve normally but are rejected in write paths.
    pub archived: bool,
    /// Parent value, `None` for roots.
    pub parent: Option<ValueId>,
    /// Child values in insertion order.
    pub children: Vec<ValueId>,
    /// 0 for roots, parent depth + 1 otherwise.
    pub depth: u32,
    /// Pre-order index within the property, starting at 1.
    pub order: u32,
}

/// A variation dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariationProperty {
    /// Property id.
    pub id: PropertyId,
    /// Unique name used in requests (e.g. `env`).
    pub name: String,
    /// Human readable name.
    pub display_name: String,
    /// Root values in insertion order.
    pub values: Vec<ValueId>,
    /// Deepest depth reached by any value of this property.
    pub max_depth: u32,
}

/// Priority order of properties for one service type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTypeVariationOrder {
    /// Service type id.
    pub service_type_id: ServiceTypeId,
    /// Properties in priority order, least significant first.
    pub properties: Vec<PropertyId>,
    rank_bases: HashMap<PropertyId, u32>,
    rank_bits: u32,
}

impl ServiceTypeVariationOrder {
    /// Returns the rank base (bit offset) of a property, if it is configured.
    pub fn rank_base(&self, property_id: PropertyId) -> Option<u32> {
        self.rank_bases.get(&property_id).copied()
    }

    /// Number of rank bits the configured properties consume.
    pub fn rank_bits(&self) -> u32 {
        self.rank_bits
    }

    /// Returns true if the property is configured for this service type.
    pub fn contains(&self, property_id: PropertyId) -> bool {
        self.rank_bases.contains_key(&property_id)
    }
}

/// Serializable view of one property and its value tree.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyTree {
    /// Property id.
    pub id: PropertyId,
    /// Property name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Deepest value depth.
    pub max_depth: u32,
    /// Root values with nested children.
    pub values: Vec<ValueNode>,
}

/// Serializable view of one value and its descendants.
#[derive(Debug, Clone, Serialize)]
pub struct ValueNode {
    /// Value id.
    pub id: ValueId,
    /// Value string.
    pub value: String,
    /// Archived flag.
    pub archived: bool,
    /// Depth in the tree.
    pub depth: u32,
    /// Pre-order index.
    pub order: u32,
    /// Children.
    pub children: Vec<ValueNode>,
}

// =============================================================================
// HIERARCHY
// =============================================================================

/// Immutable variation hierarchy snapshot.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    properties: BTreeMap<PropertyId, VariationProperty>,
    property_names: HashMap<String, PropertyId>,
    values: HashMap<ValueId, VariationPropertyValue>,
    value_index: HashMap<PropertyId, HashMap<String, ValueId>>,
    service_types: HashMap<ServiceTypeId, ServiceTypeVariationOrder>,
}

impl Hierarchy {
    // =========================================================================
    // LOOKUPS
    // =========================================================================

    /// Returns a property by id.
    pub fn property(&self, id: PropertyId) -> Option<&VariationProperty> {
        self.properties.get(&id)
    }

    /// Returns a property by name.
    pub fn property_by_name(&self, name: &str) -> Option<&VariationProperty> {
        self.property_names
            .get(name)
            .and_then(|id| self.properties.get(id))
    }

    /// Iterates over all properties ordered by id.
    pub fn all_properties(&self) -> impl Iterator<Item = &VariationProperty> {
        self.properties.values()
    }

    /// Returns a value by id.
    pub fn value(&self, id: ValueId) -> Option<&VariationPropertyValue> {
        self.values.get(&id)
    }

    /// Finds a value of a property by its string.
    pub fn find_value(&self, property_id: PropertyId, value: &str) -> Option<&VariationPropertyValue> {
        self.value_index
            .get(&property_id)
            .and_then(|index| index.get(value))
            .and_then(|id| self.values.get(id))
    }

    /// Returns the priority order for a service type.
    ///
    /// Fails with `NotFound` for a service type without linked properties and
    /// with `InvalidOperation` for one whose properties exceed [`RANK_BITS`].
    pub fn service_type(&self, id: ServiceTypeId) -> CoreResult<&ServiceTypeVariationOrder> {
        let order = self
            .service_types
            .get(&id)
            .ok_or_else(|| CoreError::not_found("service type", id))?;
        if order.rank_bits > RANK_BITS {
            return Err(rank_bits_exhausted(order));
        }
        Ok(order)
    }

    /// Returns true if the service type has at least one linked property.
    pub fn has_service_type(&self, id: ServiceTypeId) -> bool {
        self.service_types.contains_key(&id)
    }

    /// Fails with `InvalidOperation` if the service type's properties need
    /// more than [`RANK_BITS`] bits. Unknown service types pass.
    pub fn check_rank_bits(&self, id: ServiceTypeId) -> CoreResult<()> {
        match self.service_types.get(&id) {
            Some(order) if order.rank_bits > RANK_BITS => Err(rank_bits_exhausted(order)),
            _ => Ok(()),
        }
    }

    /// Number of values across all properties.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the ancestors of a value, nearest first.
    ///
    /// Unknown properties or values yield an empty list.
    pub fn parents(&self, property_id: PropertyId, value: &str) -> Vec<&VariationPropertyValue> {
        let mut parents = Vec::new();
        let mut current = self
            .find_value(property_id, value)
            .and_then(|v| v.parent)
            .and_then(|id| self.values.get(&id));

        while let Some(parent) = current {
            parents.push(parent);
            current = parent.parent.and_then(|id| self.values.get(&id));
        }
        parents
    }

    /// Returns true if `ancestor` is a strict ancestor of `descendant`.
    pub fn is_ancestor(&self, property_id: PropertyId, ancestor: &str, descendant: &str) -> bool {
        self.parents(property_id, descendant)
            .iter()
            .any(|p| p.value == ancestor)
    }

    /// Returns the properties of a service type in priority order.
    pub fn properties(&self, service_type_id: ServiceTypeId) -> CoreResult<Vec<&VariationProperty>> {
        let order = self.service_type(service_type_id)?;
        Ok(order
            .properties
            .iter()
            .filter_map(|id| self.properties.get(id))
            .collect())
    }

    // =========================================================================
    // VARIATION CONVERSIONS
    // =========================================================================

    /// Converts a name-keyed variation into value ids for a write path.
    ///
    /// Every named property must be configured for the service type and every
    /// value must exist and not be archived. The result is sorted and free of
    /// duplicates. Wildcard values are skipped, so an unconstrained variation
    /// is accepted for any service type, including one without linked
    /// properties.
    pub fn variation_map_to_ids(
        &self,
        service_type_id: ServiceTypeId,
        variation: &VariationNameMap,
    ) -> CoreResult<Vec<ValueId>> {
        if variation.values().all(|value| is_any(value)) {
            return Ok(Vec::new());
        }
        let order = self.service_type(service_type_id)?;
        let mut ids = Vec::with_capacity(variation.len());

        for (name, value) in variation {
            if is_any(value) {
                continue;
            }
            let property = self
                .property_by_name(name)
                .ok_or_else(|| CoreError::not_found("variation property", name))?;
            if !order.contains(property.id) {
                return Err(CoreError::InvalidInput(format!(
                    "property '{name}' is not configured for service type {service_type_id}"
                )));
            }
            let found = self
                .find_value(property.id, value)
                .ok_or_else(|| CoreError::not_found("variation value", format!("{name}={value}")))?;
            if found.archived {
                return Err(CoreError::InvalidOperation(format!(
                    "variation value {name}={value} is archived"
                )));
            }
            ids.push(found.id);
        }

        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Converts a name-keyed request variation into a property-keyed one.
    ///
    /// Unknown property names are malformed input; unknown values are not found.
    /// Wildcards pass through unchanged.
    pub fn variation_id_map(&self, variation: &VariationNameMap) -> CoreResult<VariationMap> {
        let mut result = VariationMap::new();
        for (name, value) in variation {
            let property = self.property_by_name(name).ok_or_else(|| {
                CoreError::InvalidInput(format!("unknown variation property '{name}'"))
            })?;
            if !is_any(value) && self.find_value(property.id, value).is_none() {
                return Err(CoreError::not_found("variation value", format!("{name}={value}")));
            }
            result.insert(property.id, value.clone());
        }
        Ok(result)
    }

    /// Converts a property-keyed variation back to property names.
    pub fn variation_string_map(&self, variation: &VariationMap) -> CoreResult<VariationNameMap> {
        variation
            .iter()
            .map(|(id, value)| {
                self.properties
                    .get(id)
                    .map(|p| (p.name.clone(), value.clone()))
                    .ok_or_else(|| CoreError::not_found("variation property", id))
            })
            .collect()
    }

    /// Builds a property-keyed variation from a set of value ids.
    pub fn variation_from_ids(&self, ids: &[ValueId]) -> CoreResult<VariationMap> {
        let mut result = VariationMap::new();
        for id in ids {
            let value = self
                .values
                .get(id)
                .ok_or_else(|| CoreError::not_found("variation value", id))?;
            if result.insert(value.property_id, value.value.clone()).is_some() {
                return Err(CoreError::InvalidInput(format!(
                    "value set has more than one value for property {}",
                    value.property_id
                )));
            }
        }
        Ok(result)
    }

    // =========================================================================
    // RANKING
    // =========================================================================

    /// Computes the specificity rank of a variation for a service type.
    ///
    /// `rank = sum(1 << (rank_base(property) + depth(value)))`. Wildcards and
    /// properties not configured for the service type contribute zero. Any
    /// property of higher priority dominates every combination of lower ones,
    /// and within a property a deeper value dominates all lower properties.
    ///
    /// The depth is part of the shift, not added to the shifted bit: a value
    /// at depth 1 of the least significant property ranks 2, not 1 + 1. Ranks
    /// are comparable within one hierarchy only.
    pub fn rank(&self, service_type_id: ServiceTypeId, variation: &VariationMap) -> CoreResult<u64> {
        let order = self.service_type(service_type_id)?;
        let mut rank = 0u64;

        for (property_id, value) in variation {
            if is_any(value) {
                continue;
            }
            let Some(base) = order.rank_base(*property_id) else {
                trace!(%property_id, %service_type_id, "property not ranked for service type");
                continue;
            };
            let found = self
                .find_value(*property_id, value)
                .ok_or_else(|| CoreError::not_found("variation value", format!("{property_id}={value}")))?;
            rank += 1u64 << (base + found.depth);
        }

        Ok(rank)
    }

    /// Returns the pre-order index of each configured property's value, in
    /// priority order. Unconstrained or wildcard dimensions report 0.
    pub fn order(&self, service_type_id: ServiceTypeId, variation: &VariationMap) -> CoreResult<Vec<u32>> {
        let order = self.service_type(service_type_id)?;
        Ok(order
            .properties
            .iter()
            .map(|property_id| {
                variation
                    .get(property_id)
                    .filter(|value| !is_any(value))
                    .and_then(|value| self.find_value(*property_id, value))
                    .map_or(0, |v| v.order)
            })
            .collect())
    }

    // =========================================================================
    // FILTERING
    // =========================================================================

    /// Matches a candidate value's variation against a requested variation.
    ///
    /// Returns `None` when the candidate does not apply. Otherwise returns the
    /// residual variation: the candidate's dimensions the request left open.
    ///
    /// Per constrained dimension the candidate applies when it equals the
    /// requested value or is one of its ancestors (inheritance). A candidate
    /// narrower than the request (a descendant of the requested value) still
    /// applies but keeps the dimension in the residual, so callers see that the
    /// candidate only covers part of what they asked for.
    ///
    /// ```rust
    /// # use strata_core::{Hierarchy, PropertyValueRow, VariationMap};
    /// # use strata_core::ids::{PropertyId, ValueId};
    /// # let row = |id: u64, parent: Option<u64>, value: &str| PropertyValueRow {
    /// #     id: ValueId(id),
    /// #     property_id: PropertyId(1),
    /// #     property_name: "env".into(),
    /// #     property_display_name: "Environment".into(),
    /// #     parent_id: parent.map(ValueId),
    /// #     value: value.into(),
    /// #     archived: false,
    /// # };
    /// let hierarchy = Hierarchy::build(&[row(1, None, "qa"), row(2, Some(1), "qa1")], &[]).unwrap();
    /// let env = |value: &str| -> VariationMap { [(PropertyId(1), value.to_string())].into_iter().collect() };
    ///
    /// // An ancestor of the request is inherited and fully resolved.
    /// assert!(hierarchy.filter(&env("qa"), &env("qa1")).unwrap().is_empty());
    /// // A descendant of the request applies, but `env` stays open.
    /// assert_eq!(hierarchy.filter(&env("qa1"), &env("qa")), Some(env("qa1")));
    /// // An unconstrained dimension stays open too.
    /// assert_eq!(hierarchy.filter(&env("qa1"), &VariationMap::new()), Some(env("qa1")));
    /// ```
    pub fn filter(&self, value_variation: &VariationMap, filter_variation: &VariationMap) -> Option<VariationMap> {
        let mut unresolved = VariationMap::new();

        for (property_id, value) in value_variation {
            if is_any(value) {
                continue;
            }
            match filter_variation.get(property_id) {
                None => {
                    unresolved.insert(*property_id, value.clone());
                }
                Some(requested) if is_any(requested) => {
                    unresolved.insert(*property_id, value.clone());
                }
                Some(requested) if requested == value => {}
                Some(requested) if self.is_ancestor(*property_id, value, requested) => {}
                Some(requested) if self.is_ancestor(*property_id, requested, value) => {
                    unresolved.insert(*property_id, value.clone());
                }
                Some(_) => return None,
            }
        }

        Some(unresolved)
    }

    // =========================================================================
    // VIEWS
    // =========================================================================

    /// Returns every property with its nested value tree.
    pub fn property_trees(&self) -> Vec<PropertyTree> {
        self.properties
            .values()
            .map(|property| PropertyTree {
                id: property.id,
                name: property.name.clone(),
                display_name: property.display_name.clone(),
                max_depth: property.max_depth,
                values: property
                    .values
                    .iter()
                    .filter_map(|id| self.value_node(*id))
                    .collect(),
            })
            .collect()
    }

    fn value_node(&self, id: ValueId) -> Option<ValueNode> {
        let value = self.values.get(&id)?;
        Some(ValueNode {
            id: value.id,
            value: value.value.clone(),
            archived: value.archived,
            depth: value.depth,
            order: value.order,
            children: value
                .children
                .iter()
                .filter_map(|child| self.value_node(*child))
                .collect(),
        })
    }
}

fn rank_bits_exhausted(order: &ServiceTypeVariationOrder) -> CoreError {
    CoreError::InvalidOperation(format!(
        "service type {} needs {} rank bits, at most {RANK_BITS} are available",
        order.service_type_id, order.rank_bits
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PropertyValueRow, ServiceTypePropertyRow};

    const ENV: PropertyId = PropertyId(1);
    const REGION: PropertyId = PropertyId(2);
    const WEB: ServiceTypeId = ServiceTypeId(1);

    fn row(id: u64, property: PropertyId, parent: Option<u64>, value: &str) -> PropertyValueRow {
        let name = if property == ENV { "env" } else { "region" };
        PropertyValueRow {
            id: ValueId(id),
            property_id: property,
            property_name: name.to_string(),
            property_display_name: name.to_uppercase(),
            parent_id: parent.map(ValueId),
            value: value.to_string(),
            archived: false,
        }
    }

    fn sample() -> Hierarchy {
        let mut values = vec![
            row(1, ENV, None, "prod"),
            row(2, ENV, None, "qa"),
            row(3, ENV, Some(2), "qa1"),
            row(4, ENV, Some(2), "qa2"),
            row(10, REGION, None, "us"),
            row(11, REGION, Some(10), "us-east"),
            row(12, REGION, Some(11), "us-east-1"),
            row(13, REGION, None, "eu"),
        ];
        values.push(PropertyValueRow {
            archived: true,
            ..row(5, ENV, None, "legacy")
        });
        // region is the least significant dimension, env the most
        let links = vec![
            ServiceTypePropertyRow { service_type_id: WEB, property_id: REGION },
            ServiceTypePropertyRow { service_type_id: WEB, property_id: ENV },
        ];
        Hierarchy::build(&values, &links).unwrap()
    }

    fn var(pairs: &[(PropertyId, &str)]) -> VariationMap {
        pairs.iter().map(|(p, v)| (*p, v.to_string())).collect()
    }

    #[test]
    fn test_parents_nearest_first() {
        let h = sample();
        let parents: Vec<_> = h.parents(REGION, "us-east-1").iter().map(|v| v.value.as_str()).collect();
        assert_eq!(parents, vec!["us-east", "us"]);
        assert!(h.parents(REGION, "us").is_empty());
        assert!(h.parents(REGION, "nowhere").is_empty());
    }

    #[test]
    fn test_properties_in_priority_order() {
        let h = sample();
        let names: Vec<_> = h.properties(WEB).unwrap().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["region", "env"]);

        let err = h.properties(ServiceTypeId(99)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_rank_wildcard_and_priority() {
        let h = sample();
        assert_eq!(h.rank(WEB, &VariationMap::new()).unwrap(), 0);
        assert_eq!(h.rank(WEB, &var(&[(ENV, "any")])).unwrap(), 0);

        // region max depth is 2, so env starts at bit 3
        assert_eq!(h.rank(WEB, &var(&[(REGION, "us")])).unwrap(), 1);
        assert_eq!(h.rank(WEB, &var(&[(REGION, "us-east-1")])).unwrap(), 4);
        assert_eq!(h.rank(WEB, &var(&[(ENV, "qa")])).unwrap(), 8);
        assert_eq!(h.rank(WEB, &var(&[(ENV, "qa1")])).unwrap(), 16);

        let deepest_region = h.rank(WEB, &var(&[(ENV, "qa"), (REGION, "us-east-1")])).unwrap();
        let child_env = h.rank(WEB, &var(&[(ENV, "qa1")])).unwrap();
        assert!(child_env > deepest_region);
    }

    #[test]
    fn test_rank_unknown_service_type() {
        let h = sample();
        let err = h.rank(ServiceTypeId(42), &var(&[(ENV, "qa")])).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_order_vector() {
        let h = sample();
        let order = h.order(WEB, &var(&[(ENV, "qa1")])).unwrap();
        // region unconstrained, env qa1 is the third value in pre-order (prod, qa, qa1)
        assert_eq!(order, vec![0, 3]);
    }

    #[test]
    fn test_filter_reflexive() {
        let h = sample();
        let v = var(&[(ENV, "qa1"), (REGION, "eu")]);
        assert_eq!(h.filter(&v, &v), Some(VariationMap::new()));
    }

    #[test]
    fn test_filter_inherits_from_ancestor() {
        let h = sample();
        let candidate = var(&[(ENV, "qa")]);
        let request = var(&[(ENV, "qa1")]);
        assert_eq!(h.filter(&candidate, &request), Some(VariationMap::new()));
    }

    #[test]
    fn test_filter_narrower_candidate_stays_unresolved() {
        let h = sample();
        let candidate = var(&[(ENV, "qa1")]);
        let request = var(&[(ENV, "qa")]);
        assert_eq!(h.filter(&candidate, &request), Some(candidate.clone()));
    }

    #[test]
    fn test_filter_unconstrained_and_mismatch() {
        let h = sample();
        let candidate = var(&[(ENV, "prod"), (REGION, "eu")]);

        let only_env = var(&[(ENV, "prod")]);
        assert_eq!(h.filter(&candidate, &only_env), Some(var(&[(REGION, "eu")])));

        let wrong_env = var(&[(ENV, "qa")]);
        assert_eq!(h.filter(&candidate, &wrong_env), None);

        let siblings = var(&[(ENV, "qa2")]);
        assert_eq!(h.filter(&var(&[(ENV, "qa1")]), &siblings), None);
    }

    #[test]
    fn test_variation_map_to_ids() {
        let h = sample();
        let mut names = VariationNameMap::new();
        names.insert("region".into(), "us-east".into());
        names.insert("env".into(), "qa1".into());
        assert_eq!(h.variation_map_to_ids(WEB, &names).unwrap(), vec![ValueId(3), ValueId(11)]);

        names.insert("env".into(), "legacy".into());
        let err = h.variation_map_to_ids(WEB, &names).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidOperation);

        names.insert("env".into(), "staging".into());
        let err = h.variation_map_to_ids(WEB, &names).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);

        let mut unknown = VariationNameMap::new();
        unknown.insert("tenant".into(), "acme".into());
        let err = h.variation_map_to_ids(WEB, &unknown).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_unconstrained_variation_needs_no_linked_properties() {
        let h = sample();
        let plain = ServiceTypeId(2);
        assert!(!h.has_service_type(plain));
        assert!(h.variation_map_to_ids(plain, &VariationNameMap::new()).unwrap().is_empty());

        let mut wildcard = VariationNameMap::new();
        wildcard.insert("env".into(), "any".into());
        assert!(h.variation_map_to_ids(plain, &wildcard).unwrap().is_empty());

        wildcard.insert("env".into(), "qa".into());
        let err = h.variation_map_to_ids(plain, &wildcard).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_variation_name_conversions() {
        let h = sample();
        let mut names = VariationNameMap::new();
        names.insert("env".into(), "qa1".into());
        names.insert("region".into(), "any".into());

        let ids = h.variation_id_map(&names).unwrap();
        assert_eq!(ids, var(&[(ENV, "qa1"), (REGION, "any")]));
        assert_eq!(h.variation_string_map(&ids).unwrap(), names);

        let mut bad = VariationNameMap::new();
        bad.insert("colour".into(), "blue".into());
        assert_eq!(h.variation_id_map(&bad).unwrap_err().kind(), crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_variation_from_ids() {
        let h = sample();
        let v = h.variation_from_ids(&[ValueId(3), ValueId(13)]).unwrap();
        assert_eq!(v, var(&[(ENV, "qa1"), (REGION, "eu")]));

        let err = h.variation_from_ids(&[ValueId(1), ValueId(2)]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_property_trees() {
        let h = sample();
        let trees = h.property_trees();
        assert_eq!(trees.len(), 2);
        let region = trees.iter().find(|t| t.name == "region").unwrap();
        assert_eq!(region.values[0].children[0].children[0].value, "us-east-1");
    }
}
