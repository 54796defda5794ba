//! Network configuration module
//!
//! Handles network configuration from cloud-init network config v1 and v2
//! formats. Everything is normalized to the v2 model in [`NetworkConfig`].

pub mod eni;
pub mod lenient;
pub mod render;
pub mod v1;

use crate::CloudInitError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Network configuration (v2 format)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default, deserialize_with = "lenient::version")]
    pub version: u8,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub renderer: Option<String>,
    #[serde(default, deserialize_with = "lenient::valid_entries")]
    pub ethernets: BTreeMap<String, EthernetConfig>,
}

/// Ethernet interface configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EthernetConfig {
    #[serde(flatten)]
    pub common: InterfaceCommon,
    #[serde(default, rename = "match")]
    pub match_config: Option<MatchConfig>,
    #[serde(default, rename = "set-name", deserialize_with = "lenient::opt_string")]
    pub set_name: Option<String>,
}

/// Settings shared by all interface kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceCommon {
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub dhcp4: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub dhcp6: Option<bool>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub addresses: Vec<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub gateway4: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub gateway6: Option<String>,
    #[serde(default)]
    pub nameservers: NameserverConfig,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub mtu: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub macaddress: Option<String>,
    #[serde(default, rename = "accept-ra", deserialize_with = "lenient::opt_bool")]
    pub accept_ra: Option<bool>,
    #[serde(default, deserialize_with = "lenient::valid_items")]
    pub routes: Vec<RouteConfig>,
}

/// Nameserver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameserverConfig {
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub addresses: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub search: Vec<String>,
}

/// Interface matching configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub macaddress: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub driver: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
}

/// Static route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub to: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub via: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub metric: Option<u32>,
}

/// v2 sections whose entries are interfaces
const INTERFACE_SECTIONS: &[&str] = &["ethernets", "bonds", "bridges", "vlans", "wifis"];

/// The config itself, or the one nested under `network:`
fn unwrap_network_key(value: &Value) -> &Value {
    match value.get("network") {
        Some(inner) if inner.get("version").is_some() => inner,
        _ => value,
    }
}

/// Every MAC address a v1 or v2 config declares, read straight from the
/// YAML so unrelated fields never matter
pub fn declared_macs(value: &Value) -> Vec<&str> {
    let value = unwrap_network_key(value);
    let mut macs = Vec::new();

    if let Some(items) = value.get("config").and_then(Value::as_sequence) {
        macs.extend(items.iter().filter_map(|item| item.get("mac_address")?.as_str()));
    }

    for section in INTERFACE_SECTIONS {
        let Some(interfaces) = value.get(*section).and_then(Value::as_mapping) else {
            continue;
        };
        for iface in interfaces.values() {
            macs.extend(iface.get("match").and_then(|m| m.get("macaddress")?.as_str()));
            macs.extend(iface.get("macaddress").and_then(Value::as_str));
        }
    }
    macs
}

/// Whether the config declares `mac` (case-insensitive)
pub fn config_has_mac(value: &Value, mac: &str) -> bool {
    declared_macs(value).iter().any(|m| m.eq_ignore_ascii_case(mac))
}

/// Detect and parse structured network config (v1 or v2).
///
/// Accepts the config at top level or nested under a `network:` key.
pub fn parse_network_config(value: &Value) -> Result<NetworkConfig, CloudInitError> {
    let value = unwrap_network_key(value);
    let version = match value.get("version") {
        None => 2,
        Some(v) => v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()).unwrap_or(0),
    };
    let invalid = |e: serde_yaml::Error| CloudInitError::Config(format!("invalid network-config: {}", e));

    match version {
        1 => {
            let v1: v1::NetworkConfigV1 = serde_yaml::from_value(value.clone()).map_err(invalid)?;
            Ok(v1.to_v2())
        }
        2 => {
            let mut v2: NetworkConfig = serde_yaml::from_value(value.clone()).map_err(invalid)?;
            v2.version = 2;
            Ok(v2)
        }
        other => Err(CloudInitError::Config(format!(
            "unsupported network-config version: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_v2() {
        let config = parse_network_config(&yaml(
            r#"
version: 2
ethernets:
  eth0:
    dhcp4: true
    match:
      macaddress: "52:54:00:12:34:56"
    set-name: eth0
  ens4:
    addresses: [10.0.0.5/24]
    macaddress: "52:54:00:AB:CD:EF"
"#,
        ))
        .unwrap();

        assert_eq!(config.ethernets.len(), 2);
        assert_eq!(config.ethernets["eth0"].common.dhcp4, Some(true));
        assert_eq!(config.ethernets["eth0"].set_name.as_deref(), Some("eth0"));
        assert_eq!(config.ethernets["ens4"].common.macaddress.as_deref(), Some("52:54:00:AB:CD:EF"));
    }

    #[test]
    fn test_config_has_mac_ignores_case() {
        let config = yaml("version: 2\nethernets:\n  eth1:\n    match:\n      macaddress: 52:54:00:ab:cd:ef\n");
        assert!(config_has_mac(&config, "52:54:00:AB:CD:EF"));
        assert!(!config_has_mac(&config, "52:54:00:00:00:00"));
    }

    #[test]
    fn test_declared_macs_across_sections() {
        let config = yaml(
            r#"
version: 2
ethernets:
  eth0:
    match:
      macaddress: "aa:aa:aa:aa:aa:01"
  eth1:
    macaddress: "aa:aa:aa:aa:aa:02"
bonds:
  bond0:
    interfaces: [eth0, eth1]
    macaddress: "aa:aa:aa:aa:aa:03"
"#,
        );
        assert_eq!(
            declared_macs(&config),
            vec!["aa:aa:aa:aa:aa:01", "aa:aa:aa:aa:aa:02", "aa:aa:aa:aa:aa:03"]
        );
        assert!(declared_macs(&yaml("[]")).is_empty());
    }

    #[test]
    fn test_values_outside_the_model_still_parse() {
        let config = yaml(
            r#"
version: 2
ethernets:
  eth1:
    match:
      macaddress: "aa:bb:cc:dd:ee:01"
    dhcp4: yes
    mtu: "9000"
    addresses:
      - 10.0.0.5/24:
          lifetime: 0
      - 10.0.0.6/24
    routes:
      - via: 10.0.0.1
      - to: 0.0.0.0/0
        via: 10.0.0.1
    optional: true
  broken: [not, a, mapping]
"#,
        );
        let parsed = parse_network_config(&config).unwrap();

        let eth1 = &parsed.ethernets["eth1"];
        assert_eq!(eth1.common.dhcp4, Some(true));
        assert_eq!(eth1.common.mtu, Some(9000));
        assert_eq!(eth1.common.addresses, vec!["10.0.0.5/24", "10.0.0.6/24"]);
        assert_eq!(eth1.common.routes.len(), 1);
        assert!(!parsed.ethernets.contains_key("broken"));
    }

    #[test]
    fn test_parse_nested_v1() {
        let config = parse_network_config(&yaml(
            r#"
network:
  version: 1
  config:
    - type: physical
      name: eth0
      mac_address: "aa:bb:cc:dd:ee:ff"
      subnets:
        - type: dhcp
"#,
        ))
        .unwrap();

        assert_eq!(config.version, 2);
        assert!(config.ethernets.contains_key("eth0"));
        assert!(config_has_mac(
            &yaml("network:\n  version: 1\n  config:\n    - type: bond\n      name: bond0\n      mac_address: AA:BB:CC:DD:EE:FF\n"),
            "aa:bb:cc:dd:ee:ff"
        ));
    }

    #[test]
    fn test_unknown_version() {
        let err = parse_network_config(&yaml("version: 3\n")).unwrap_err();
        assert!(matches!(err, CloudInitError::Config(_)));
    }
}
