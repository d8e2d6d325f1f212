//! # Strata Core
//!
//! Core data structures and algorithms for the Strata configuration engine.
//!
//! This crate is synchronous and storage-agnostic. It provides:
//!
//! - [`Hierarchy`]: the immutable tree of variation properties and values, with
//!   per-service-type priority ordering, rank computation and request filtering
//! - [`PermissionCollection`]: hierarchy-aware permission matching
//! - [`merge`]: the JSON overlay operator used to combine resolved values
//!
//! ## Ranking
//!
//! Each service type orders its properties from least to most significant. A
//! property's rank base is the sum of `max_depth + 1` over every less
//! significant property, and a variation's rank is
//! `sum(1 << (rank_base + depth))`. Higher-priority dimensions therefore always
//! outrank lower ones, and deeper values outrank their ancestors.
//!
//! ```rust
//! use strata_core::{Hierarchy, PropertyValueRow, ServiceTypePropertyRow, VariationMap};
//! use strata_core::ids::{PropertyId, ServiceTypeId, ValueId};
//!
//! let rows = vec![
//!     PropertyValueRow {
//!         id: ValueId(1),
//!         property_id: PropertyId(1),
//!         property_name: "env".into(),
//!         property_display_name: "Environment".into(),
//!         parent_id: None,
//!         value: "qa".into(),
//!         archived: false,
//!     },
//!     PropertyValueRow {
//!         id: ValueId(2),
//!         property_id: PropertyId(1),
//!         property_name: "env".into(),
//!         property_display_name: "Environment".into(),
//!         parent_id: Some(ValueId(1)),
//!         value: "qa1".into(),
//!         archived: false,
//!     },
//! ];
//! let links = vec![ServiceTypePropertyRow {
//!     service_type_id: ServiceTypeId(1),
//!     property_id: PropertyId(1),
//! }];
//! let hierarchy = Hierarchy::build(&rows, &links).unwrap();
//!
//! let candidate: VariationMap = [(PropertyId(1), "qa".to_string())].into_iter().collect();
//! let request: VariationMap = [(PropertyId(1), "qa1".to_string())].into_iter().collect();
//! assert!(hierarchy.filter(&candidate, &request).unwrap().is_empty());
//! assert_eq!(hierarchy.rank(ServiceTypeId(1), &candidate).unwrap(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod hierarchy;
pub mod ids;
pub mod merge;
pub mod permission;
pub mod types;

// Re-export core types
pub use error::{CoreError, CoreResult, ErrorKind};
pub use hierarchy::{
    Hierarchy, PropertyTree, ServiceTypeVariationOrder, ValueNode, VariationProperty,
    VariationPropertyValue,
};
pub use merge::{merge, merge_into};
pub use permission::{
    ExpandedVariation, Permission, PermissionCollection, PermissionLevel, PermissionRow,
    PermissionScope, ScopeKind, User,
};
pub use types::{
    is_any, DataType, PropertyValueRow, ServiceTypePropertyRow, VariationMap, VariationNameMap,
    ANY_VALUE,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{CoreError, CoreResult, ErrorKind};
    pub use crate::hierarchy::Hierarchy;
    pub use crate::ids::*;
    pub use crate::permission::{PermissionCollection, PermissionLevel, PermissionScope, User};
    pub use crate::types::{DataType, VariationMap, VariationNameMap};
}
