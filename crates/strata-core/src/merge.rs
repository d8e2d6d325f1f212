//! JSON overlay merge.
//!
//! Objects merge key by key, recursively. Every other pairing is replaced
//! wholesale by the overlay: arrays are not merged element-wise and an explicit
//! `null` in the overlay sets the key to `null` rather than removing it.
//!
//! The operator is not associative in general; only "last overlay wins per key
//! path" is guaranteed.

use serde_json::Value;

/// Merges `overlay` onto `base`, returning a new document.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.get(key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Object(result)
        }
        _ => overlay.clone(),
    }
}

/// Merges `overlay` into `base` in place.
pub fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_into(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, _) => *base = overlay.clone(),
    }
}
