//! Hierarchy construction from storage rows.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{Hierarchy, ServiceTypeVariationOrder, VariationProperty, VariationPropertyValue};
use crate::error::{CoreError, CoreResult};
use crate::ids::{PropertyId, ServiceTypeId};
use crate::types::{PropertyValueRow, ServiceTypePropertyRow};

/// Number of rank bits a service type may consume. Ranks are `u64` sums of
/// distinct powers of two, so keeping the total below 64 bits rules out overflow.
pub const RANK_BITS: u32 = 63;

impl Hierarchy {
    /// Builds a hierarchy snapshot.
    ///
    /// `value_rows` must list every parent before its children. A row whose
    /// parent has not been indexed yet fails the build instead of producing a
    /// detached subtree. `service_type_rows` list each service type's
    /// properties least significant first; links to properties without any
    /// values are skipped until the property gains a value.
    ///
    /// A service type whose properties need more than [`RANK_BITS`] bits is
    /// still indexed, but [`Hierarchy::service_type`] rejects it. Other
    /// service types are unaffected.
    pub fn build(
        value_rows: &[PropertyValueRow],
        service_type_rows: &[ServiceTypePropertyRow],
    ) -> CoreResult<Self> {
        let mut hierarchy = Hierarchy::default();

        for row in value_rows {
            hierarchy.insert_value(row)?;
        }
        hierarchy.assign_orders();
        hierarchy.assign_rank_bases(service_type_rows)?;

        debug!(
            properties = hierarchy.properties.len(),
            values = hierarchy.values.len(),
            service_types = hierarchy.service_types.len(),
            "built variation hierarchy"
        );
        Ok(hierarchy)
    }

    fn insert_value(&mut self, row: &PropertyValueRow) -> CoreResult<()> {
        if self.values.contains_key(&row.id) {
            return Err(CoreError::InvalidInput(format!(
                "duplicate variation value id {}",
                row.id
            )));
        }

        let known = *self
            .property_names
            .entry(row.property_name.clone())
            .or_insert(row.property_id);
        if known != row.property_id {
            return Err(CoreError::InvalidInput(format!(
                "property name '{}' is used by properties {} and {}",
                row.property_name, known, row.property_id
            )));
        }

        let index = self.value_index.entry(row.property_id).or_default();
        if index.contains_key(&row.value) {
            return Err(CoreError::InvalidInput(format!(
                "duplicate value '{}' for property '{}'",
                row.value, row.property_name
            )));
        }

        let property = self
            .properties
            .entry(row.property_id)
            .or_insert_with(|| VariationProperty {
                id: row.property_id,
                name: row.property_name.clone(),
                display_name: row.property_display_name.clone(),
                values: Vec::new(),
                max_depth: 0,
            });

        let depth = match row.parent_id {
            Some(parent_id) => {
                let parent = self.values.get_mut(&parent_id).ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "value {} references parent {} which precedes no indexed row",
                        row.id, parent_id
                    ))
                })?;
                if parent.property_id != row.property_id {
                    return Err(CoreError::InvalidInput(format!(
                        "value {} and its parent {} belong to different properties",
                        row.id, parent_id
                    )));
                }
                parent.children.push(row.id);
                parent.depth + 1
            }
            None => {
                property.values.push(row.id);
                0
            }
        };
        property.max_depth = property.max_depth.max(depth);

        index.insert(row.value.clone(), row.id);
        self.values.insert(
            row.id,
            VariationPropertyValue {
                id: row.id,
                property_id: row.property_id,
                value: row.value.clone(),
                archived: row.archived,
                parent: row.parent_id,
                children: Vec::new(),
                depth,
                order: 0,
            },
        );
        Ok(())
    }

    /// Pre-order walk per property; orders start at 1 and are unique per property.
    fn assign_orders(&mut self) {
        for property in self.properties.values() {
            let mut counter = 0u32;
            let mut stack: Vec<_> = property.values.iter().rev().copied().collect();

            while let Some(id) = stack.pop() {
                let Some(value) = self.values.get_mut(&id) else {
                    continue;
                };
                counter += 1;
                value.order = counter;
                stack.extend(value.children.iter().rev().copied());
            }
        }
    }

    fn assign_rank_bases(&mut self, rows: &[ServiceTypePropertyRow]) -> CoreResult<()> {
        let mut grouped: Vec<(ServiceTypeId, Vec<PropertyId>)> = Vec::new();
        let mut positions: HashMap<ServiceTypeId, usize> = HashMap::new();
        for row in rows {
            let position = *positions.entry(row.service_type_id).or_insert_with(|| {
                grouped.push((row.service_type_id, Vec::new()));
                grouped.len() - 1
            });
            grouped[position].1.push(row.property_id);
        }

        for (service_type_id, property_ids) in grouped {
            let mut running_total = 0u32;
            let mut rank_bases = HashMap::new();
            let mut properties = Vec::new();

            for property_id in property_ids {
                let Some(property) = self.properties.get(&property_id) else {
                    debug!(%service_type_id, %property_id, "skipping link to property without values");
                    continue;
                };
                if rank_bases.contains_key(&property_id) {
                    continue;
                }
                rank_bases.insert(property_id, running_total);
                properties.push(property_id);
                running_total += property.max_depth + 1;
            }

            if running_total > RANK_BITS {
                warn!(
                    %service_type_id,
                    rank_bits = running_total,
                    "service type exceeds the available rank bits"
                );
            }

            self.service_types.insert(
                service_type_id,
                ServiceTypeVariationOrder {
                    service_type_id,
                    properties,
                    rank_bases,
                    rank_bits: running_total,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ValueId;
    use crate::types::VariationMap;
    use crate::ErrorKind;

    fn row(id: u64, property: u64, parent: Option<u64>, value: &str) -> PropertyValueRow {
        PropertyValueRow {
            id: ValueId(id),
            property_id: PropertyId(property),
            property_name: format!("p{property}"),
            property_display_name: format!("Property {property}"),
            parent_id: parent.map(ValueId),
            value: value.to_string(),
            archived: false,
        }
    }

    #[test]
    fn test_depth_and_max_depth() {
        let rows = vec![
            row(1, 1, None, "a"),
            row(2, 1, Some(1), "a.b"),
            row(3, 1, Some(2), "a.b.c"),
            row(4, 1, None, "d"),
        ];
        let h = Hierarchy::build(&rows, &[]).unwrap();
        assert_eq!(h.value(ValueId(1)).unwrap().depth, 0);
        assert_eq!(h.value(ValueId(3)).unwrap().depth, 2);
        assert_eq!(h.property(PropertyId(1)).unwrap().max_depth, 2);
        assert_eq!(h.value(ValueId(1)).unwrap().children, vec![ValueId(2)]);
    }

    #[test]
    fn test_pre_order_assignment() {
        let rows = vec![
            row(1, 1, None, "a"),
            row(2, 1, None, "b"),
            row(3, 1, Some(1), "a1"),
            row(4, 1, Some(3), "a11"),
            row(5, 1, Some(1), "a2"),
        ];
        let h = Hierarchy::build(&rows, &[]).unwrap();
        let order = |id| h.value(ValueId(id)).unwrap().order;
        assert_eq!((order(1), order(3), order(4), order(5), order(2)), (1, 2, 3, 4, 5));
    }

    #[test]
    fn test_missing_parent_fails() {
        let rows = vec![row(2, 1, Some(1), "orphan"), row(1, 1, None, "root")];
        let err = Hierarchy::build(&rows, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_cross_property_parent_fails() {
        let rows = vec![row(1, 1, None, "a"), row(2, 2, Some(1), "b")];
        assert!(Hierarchy::build(&rows, &[]).is_err());
    }

    #[test]
    fn test_duplicate_value_fails() {
        let rows = vec![row(1, 1, None, "a"), row(2, 1, None, "a")];
        assert!(Hierarchy::build(&rows, &[]).is_err());
        let rows = vec![row(1, 1, None, "a"), row(1, 1, None, "b")];
        assert!(Hierarchy::build(&rows, &[]).is_err());
    }

    #[test]
    fn test_rank_bases_accumulate() {
        let rows = vec![
            row(1, 1, None, "a"),
            row(2, 1, Some(1), "a1"),
            row(10, 2, None, "x"),
        ];
        let links = vec![
            ServiceTypePropertyRow { service_type_id: ServiceTypeId(7), property_id: PropertyId(1) },
            ServiceTypePropertyRow { service_type_id: ServiceTypeId(7), property_id: PropertyId(2) },
            ServiceTypePropertyRow { service_type_id: ServiceTypeId(7), property_id: PropertyId(3) },
        ];
        let h = Hierarchy::build(&rows, &links).unwrap();
        let order = h.service_type(ServiceTypeId(7)).unwrap();
        assert_eq!(order.rank_base(PropertyId(1)), Some(0));
        assert_eq!(order.rank_base(PropertyId(2)), Some(2));
        // property 3 has no values and is skipped
        assert_eq!(order.rank_base(PropertyId(3)), None);
        assert_eq!(order.properties, vec![PropertyId(1), PropertyId(2)]);
    }

    #[test]
    fn test_rank_bits_exhausted() {
        let mut rows = vec![row(1, 1, None, "v0")];
        for i in 1..64u64 {
            rows.push(row(i + 1, 1, Some(i), &format!("v{i}")));
        }
        let links = vec![ServiceTypePropertyRow {
            service_type_id: ServiceTypeId(1),
            property_id: PropertyId(1),
        }];
        let err = Hierarchy::build(&rows, &links)
            .unwrap()
            .service_type(ServiceTypeId(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_rank_bits_exhaustion_is_per_service_type() {
        let mut rows = vec![row(1, 1, None, "v0")];
        for i in 1..64u64 {
            rows.push(row(i + 1, 1, Some(i), &format!("v{i}")));
        }
        rows.push(row(100, 2, None, "eu"));
        let links = vec![
            ServiceTypePropertyRow {
                service_type_id: ServiceTypeId(1),
                property_id: PropertyId(1),
            },
            ServiceTypePropertyRow {
                service_type_id: ServiceTypeId(2),
                property_id: PropertyId(2),
            },
        ];
        let h = Hierarchy::build(&rows, &links).unwrap();

        let deep: VariationMap = [(PropertyId(1), "v63".to_string())].into_iter().collect();
        assert_eq!(
            h.rank(ServiceTypeId(1), &deep).unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(h.check_rank_bits(ServiceTypeId(1)).unwrap_err().kind(), ErrorKind::InvalidOperation);

        let shallow: VariationMap = [(PropertyId(2), "eu".to_string())].into_iter().collect();
        assert_eq!(h.rank(ServiceTypeId(2), &shallow).unwrap(), 1);
        assert!(h.check_rank_bits(ServiceTypeId(2)).is_ok());
        assert_eq!(h.service_type(ServiceTypeId(2)).unwrap().rank_bits(), 1);
    }
}
