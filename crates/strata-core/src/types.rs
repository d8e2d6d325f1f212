//! Plain data shared between the core and its storage collaborators.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{PropertyId, ServiceTypeId, ValueId};

/// Wildcard value: constrains nothing and contributes nothing to rank.
pub const ANY_VALUE: &str = "any";

/// A variation keyed by property id: `propertyId -> value`.
///
/// Ordered so that iteration, hashing and serialization are deterministic.
pub type VariationMap = BTreeMap<PropertyId, String>;

/// A variation keyed by property name: `propertyName -> value`.
pub type VariationNameMap = BTreeMap<String, String>;

/// Returns true if `value` is the wildcard.
pub fn is_any(value: &str) -> bool {
    value == ANY_VALUE
}

// =============================================================================
// HIERARCHY ROWS
// =============================================================================

/// One variation property value as returned by storage.
///
/// Rows must arrive parent-before-child (for example by ascending creation id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValueRow {
    /// Value id.
    pub id: ValueId,
    /// Owning property id.
    pub property_id: PropertyId,
    /// Owning property name.
    pub property_name: String,
    /// Owning property display name.
    pub property_display_name: String,
    /// Parent value id (`None` for roots).
    pub parent_id: Option<ValueId>,
    /// The value string.
    pub value: String,
    /// Archived values stay resolvable but may not be referenced by writes.
    pub archived: bool,
}

/// Link between a service type and one of its properties.
///
/// Rows for a service type arrive in configured priority order, least
/// significant property first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTypePropertyRow {
    /// Service type id.
    pub service_type_id: ServiceTypeId,
    /// Property id.
    pub property_id: PropertyId,
}

// =============================================================================
// DATA TYPE
// =============================================================================

/// Declared data type of a configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `true` / `false`.
    Boolean,
    /// Signed integer.
    Integer,
    /// Floating point number.
    Float,
    /// Free-form string.
    #[default]
    String,
    /// JSON document. Only this type is deep-merged during resolution.
    Json,
}

impl DataType {
    /// Returns the string identifier for this data type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Json => "json",
        }
    }

    /// Returns true for JSON-shaped payloads.
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Ok(Self::Boolean),
            "integer" | "int" => Ok(Self::Integer),
            "float" | "double" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "json" => Ok(Self::Json),
            other => Err(CoreError::InvalidInput(format!("unknown data type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parse() {
        assert_eq!("JSON".parse::<DataType>().unwrap(), DataType::Json);
        assert_eq!("bool".parse::<DataType>().unwrap(), DataType::Boolean);
        assert!("yaml".parse::<DataType>().is_err());
        assert!(DataType::Json.is_json());
        assert!(!DataType::String.is_json());
    }

    #[test]
    fn test_any_wildcard() {
        assert!(is_any("any"));
        assert!(!is_any("Any"));
        assert!(!is_any("prod"));
    }
}
