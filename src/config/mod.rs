//! System configuration
//!
//! `/etc/cloud/cloud.cfg` and its drop-ins, deep-merged and deserialized
//! into [`SystemConfig`]. Only the keys that drive datasource discovery and
//! update events are typed; everything else is ignored.

pub mod loader;
pub mod merge;

pub use loader::load_system_config;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Public SoftLayer metadata API
pub const SOFTLAYER_METADATA_URL: &str =
    "https://api.service.softlayer.com/rest/v3.1/SoftLayer_Resource_Metadata";

/// Typed view of the merged system configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Allow-list and order of datasources to try
    pub datasource_list: Option<Vec<String>>,

    /// Per-datasource settings
    pub datasource: DatasourceSettings,

    /// Events that trigger re-reading metadata
    pub updates: UpdatesConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceSettings {
    #[serde(rename = "NoCloud")]
    pub nocloud: NoCloudSettings,
    #[serde(rename = "ExtraConfig")]
    pub extra_config: ExtraConfigSettings,
    #[serde(rename = "SoftLayer")]
    pub softlayer: SoftLayerSettings,
}

/// `datasource.NoCloud`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoCloudSettings {
    pub seedfrom: Option<String>,

    /// Volume label to probe; `null` disables volume probing
    pub fs_label: Option<String>,

    /// Default dsmode when no source sets one
    pub dsmode: Option<String>,

    /// Mapping, or YAML text
    #[serde(rename = "meta-data")]
    pub meta_data: Option<Value>,

    #[serde(rename = "user-data")]
    pub user_data: Option<String>,

    #[serde(rename = "vendor-data")]
    pub vendor_data: Option<String>,

    #[serde(rename = "network-config")]
    pub network_config: Option<Value>,
}

impl Default for NoCloudSettings {
    fn default() -> Self {
        Self {
            seedfrom: None,
            fs_label: Some("cidata".to_string()),
            dsmode: None,
            meta_data: None,
            user_data: None,
            vendor_data: None,
            network_config: None,
        }
    }
}

/// `datasource.ExtraConfig`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraConfigSettings {
    pub metadata_format: String,
}

impl Default for ExtraConfigSettings {
    fn default() -> Self {
        Self {
            metadata_format: "rightscale".to_string(),
        }
    }
}

/// `datasource.SoftLayer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftLayerSettings {
    pub metadata_url: String,
}

impl Default for SoftLayerSettings {
    fn default() -> Self {
        Self {
            metadata_url: SOFTLAYER_METADATA_URL.to_string(),
        }
    }
}

/// `updates`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatesConfig {
    pub network: ScopeUpdates,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeUpdates {
    /// Event type names, e.g. `hotplug`
    pub when: Vec<String>,
}

impl SystemConfig {
    /// Parse from YAML; an empty document gives the defaults
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        Self::from_value(serde_yaml::from_str(yaml)?)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_yaml::Error> {
        match value {
            Value::Null => Ok(Self::default()),
            v => serde_yaml::from_value(v),
        }
    }

    /// Configured update event names for a scope
    pub fn update_events(&self, scope: &str) -> &[String] {
        match scope {
            "network" => &self.updates.network.when,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SystemConfig::from_yaml("").unwrap();
        assert!(config.datasource_list.is_none());
        assert_eq!(config.datasource.nocloud.fs_label.as_deref(), Some("cidata"));
        assert_eq!(config.datasource.extra_config.metadata_format, "rightscale");
        assert_eq!(config.datasource.softlayer.metadata_url, SOFTLAYER_METADATA_URL);
        assert!(config.update_events("network").is_empty());
    }

    #[test]
    fn test_parse_nocloud_settings() {
        let yaml = r#"
datasource_list: [NoCloud, None]
datasource:
  NoCloud:
    seedfrom: http://10.0.0.2/seed/
    dsmode: local
    meta-data:
      instance-id: cfg-1
    user-data: |
      #cloud-config
updates:
  network:
    when: [boot, hotplug]
"#;
        let config = SystemConfig::from_yaml(yaml).unwrap();
        let nocloud = &config.datasource.nocloud;

        assert_eq!(config.datasource_list, Some(vec!["NoCloud".into(), "None".into()]));
        assert_eq!(nocloud.seedfrom.as_deref(), Some("http://10.0.0.2/seed/"));
        assert_eq!(nocloud.dsmode.as_deref(), Some("local"));
        assert_eq!(nocloud.fs_label.as_deref(), Some("cidata"));
        assert!(nocloud.meta_data.is_some());
        assert_eq!(config.update_events("network"), ["boot", "hotplug"]);
    }

    #[test]
    fn test_null_fs_label_disables_probing() {
        let config = SystemConfig::from_yaml("datasource:\n  NoCloud:\n    fs_label: null\n").unwrap();
        assert!(config.datasource.nocloud.fs_label.is_none());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = SystemConfig::from_yaml("users: [default]\ncloud_init_modules: [seed_random]\n").unwrap();
        assert_eq!(config, SystemConfig::default());
    }
}
