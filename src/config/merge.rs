//! Configuration merging
//!
//! System configuration is layered with proper precedence:
//! 1. /etc/cloud/cloud.cfg (base)
//! 2. /etc/cloud/cloud.cfg.d/*.cfg (sorted alphabetically)
//!
//! Mappings merge recursively; any other overlay value replaces the base.

use serde_yaml::Value;
use tracing::debug;

/// Merge two YAML values recursively
pub fn merge_yaml_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();

            for (key, overlay_value) in overlay_map {
                let merged = match result.get(key) {
                    Some(base_value) => merge_yaml_values(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                result.insert(key.clone(), merged);
            }

            Value::Mapping(result)
        }

        // An empty document never erases what came before
        (base_value, Value::Null) => base_value.clone(),

        (_, overlay_value) => overlay_value.clone(),
    }
}

/// Merge documents in order (later documents have higher priority)
pub fn merge_all_values(values: &[Value]) -> Value {
    values.iter().fold(Value::Null, |acc, value| {
        debug!("Merging configuration document");
        merge_yaml_values(&acc, value)
    })
}
