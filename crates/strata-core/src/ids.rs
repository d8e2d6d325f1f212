//! Identifier types used across the variation engine.
//!
//! All identifiers are thin numeric newtypes so that a property id can never be
//! passed where a value id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a new identifier.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw identifier value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Variation property identifier (a dimension such as `env`).
    PropertyId
);

numeric_id!(
    /// Variation property value identifier (a node in a property's value tree).
    ValueId
);

numeric_id!(
    /// Service type identifier. Determines which properties apply and their priority.
    ServiceTypeId
);

numeric_id!(
    /// Variation context identifier: one canonical set of value ids.
    ContextId
);

numeric_id!(
    /// Service identifier.
    ServiceId
);

numeric_id!(
    /// Concrete service version identifier.
    ServiceVersionId
);

numeric_id!(
    /// Feature identifier (a group of keys within a service).
    FeatureId
);

numeric_id!(
    /// Key identifier.
    KeyId
);

numeric_id!(
    /// Changeset identifier. Zero is reserved for "head".
    ChangesetId
);

numeric_id!(
    /// User identifier.
    UserId
);

impl ChangesetId {
    /// The head pseudo-changeset: resolve against the latest applied state.
    pub const HEAD: ChangesetId = ChangesetId(0);

    /// Returns true if this id refers to head rather than a concrete changeset.
    pub fn is_head(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_serde() {
        let id = PropertyId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");

        let parsed: ValueId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, ValueId(7));
    }

    #[test]
    fn test_head_changeset() {
        assert!(ChangesetId::HEAD.is_head());
        assert!(!ChangesetId::new(3).is_head());
    }
}
