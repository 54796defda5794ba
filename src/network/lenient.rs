//! Tolerant field decoders
//!
//! Network configs in the wild use YAML 1.1 booleans (`yes`, `on`), numbers
//! written as strings and address forms richer than plain CIDR strings.
//! A field the renderer cannot use decodes to its empty value instead of
//! failing the whole config.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "y" => Some(true),
            "false" | "no" | "off" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// `version: 2` or `version: "2"`; anything else is 0
pub fn version<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u8::try_from(n).ok()).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// A scalar string; lists and maps (e.g. a netplan driver list) give `None`
pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(scalar_string))
}

/// A whitespace-separated string, or a list of strings or of single-key
/// maps such as `- 10.0.0.5/24: {lifetime: 0}`
pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(Value::Sequence(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Mapping(m) if m.len() == 1 => m.into_iter().next().and_then(|(k, _)| scalar_string(k)),
                other => scalar_string(other),
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// List items that decode as `T`; the rest are skipped
pub fn valid_items<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match Option::<Value>::deserialize(d)? {
        Some(Value::Sequence(items)) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_yaml::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Skipping network config item: {}", e);
                None
            }
        })
        .collect())
}

/// Named entries that decode as `T`; a null entry is `T::default()`
pub fn valid_entries<'de, D, T>(d: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let entries = match Option::<Value>::deserialize(d)? {
        Some(Value::Mapping(m)) => m,
        _ => return Ok(BTreeMap::new()),
    };
    Ok(entries
        .into_iter()
        .filter_map(|(name, body)| {
            let name = scalar_string(name)?;
            let parsed = match body {
                Value::Null => Ok(T::default()),
                body => serde_yaml::from_value(body),
            };
            match parsed {
                Ok(v) => Some((name, v)),
                Err(e) => {
                    debug!("Skipping interface {}: {}", name, e);
                    None
                }
            }
        })
        .collect())
}

fn scalar_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    struct Fields {
        #[serde(default, deserialize_with = "opt_bool")]
        flag: Option<bool>,
        #[serde(default, deserialize_with = "opt_u32")]
        mtu: Option<u32>,
        #[serde(default, deserialize_with = "string_list")]
        addresses: Vec<String>,
        #[serde(default, deserialize_with = "opt_string")]
        driver: Option<String>,
    }

    fn decode(yaml: &str) -> Fields {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_yaml11_booleans() {
        assert_eq!(decode("flag: yes").flag, Some(true));
        assert_eq!(decode("flag: Off").flag, Some(false));
        assert_eq!(decode("flag: true").flag, Some(true));
        assert_eq!(decode("flag: maybe").flag, None);
    }

    #[test]
    fn test_numbers_as_strings() {
        assert_eq!(decode("mtu: \"9000\"").mtu, Some(9000));
        assert_eq!(decode("mtu: 1500").mtu, Some(1500));
        assert_eq!(decode("mtu: [1]").mtu, None);
    }

    #[test]
    fn test_address_forms() {
        let p = decode("addresses:\n  - 10.0.0.5/24:\n      lifetime: 0\n  - 10.0.0.6/24\n  - [bogus]\n");
        assert_eq!(p.addresses, vec!["10.0.0.5/24", "10.0.0.6/24"]);
        assert_eq!(decode("addresses: 8.8.8.8 8.8.4.4").addresses, vec!["8.8.8.8", "8.8.4.4"]);
    }

    #[test]
    fn test_driver_list_is_ignored() {
        assert_eq!(decode("driver: [ixgbe, i40e]").driver, None);
        assert_eq!(decode("driver: virtio_net").driver.as_deref(), Some("virtio_net"));
    }
}
