//! Seed discovery
//!
//! A seed is the raw bundle of metadata, user-data, vendor-data and
//! network-config handed to an instance before anything is applied. Seeds
//! are gathered from several sources (DMI, kernel command line, seed
//! directories, static config, labeled volumes, a `seedfrom` URL) and merged
//! into one [`SeedBundle`] by the [`resolver`].

pub mod cmdline;
pub mod dmi;
pub mod fake;
pub mod fetch;
pub mod host;
pub mod resolver;

pub use host::{DeviceFilter, LinuxHost, SeedHost};
pub use resolver::{Resolution, ResolvedSeed, SeedPolicy, SeedResolver};

use crate::CloudInitError;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Files that must exist for a directory or volume to count as a seed
pub const REQUIRED_SEED_FILES: &[&str] = &["user-data", "meta-data"];

/// Files merged when present
pub const OPTIONAL_SEED_FILES: &[&str] = &["vendor-data", "network-config"];

/// Raw file contents keyed by file name
pub type SeedFiles = BTreeMap<String, String>;

/// Whether a datasource applies before networking, after it, or not at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DsMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "net")]
    Network,
    #[serde(rename = "disabled")]
    Disabled,
}

impl DsMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Some(Self::Local),
            "net" | "network" => Some(Self::Network),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Network => "net",
            Self::Disabled => "disabled",
        }
    }

    /// Mode implied by a `seedfrom` URL scheme
    pub fn from_seedfrom(seedfrom: &str) -> Option<Self> {
        if ["http://", "https://", "ftp://", "ftps://"]
            .iter()
            .any(|p| seedfrom.starts_with(p))
        {
            Some(Self::Network)
        } else if seedfrom.starts_with("file://") || seedfrom.starts_with('/') {
            Some(Self::Local)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved configuration unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedBundle {
    pub metadata: Mapping,
    #[serde(default)]
    pub user_data: String,
    #[serde(default)]
    pub vendor_data: String,
    #[serde(default)]
    pub network_config: Option<Value>,
}

impl SeedBundle {
    /// String value of a metadata key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.get_str("instance-id")
    }

    /// Layer a contribution on top of this bundle.
    ///
    /// Metadata keys are replaced wholesale (no deep merge). User-data and
    /// vendor-data are replaced only by non-empty values; network-config by
    /// any supplied value.
    pub fn merged(mut self, contribution: SeedContribution) -> Self {
        for (key, value) in contribution.metadata {
            self.metadata.insert(key, value);
        }
        if let Some(ud) = contribution.user_data.filter(|s| !s.is_empty()) {
            self.user_data = ud;
        }
        if let Some(vd) = contribution.vendor_data.filter(|s| !s.is_empty()) {
            self.vendor_data = vd;
        }
        if contribution.network_config.is_some() {
            self.network_config = contribution.network_config;
        }
        self
    }

    /// Fill in keys that no source supplied
    pub fn with_defaults(mut self, defaults: Mapping) -> Self {
        for (key, value) in defaults {
            if !self.metadata.contains_key(&key) {
                self.metadata.insert(key, value);
            }
        }
        self
    }
}

/// A partial bundle produced by one seed source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedContribution {
    pub metadata: Mapping,
    pub user_data: Option<String>,
    pub vendor_data: Option<String>,
    pub network_config: Option<Value>,
}

impl SeedContribution {
    /// Contribution carrying metadata only
    pub fn metadata(metadata: Mapping) -> Self {
        Self {
            metadata,
            ..Default::default()
        }
    }

    /// Build from the files of a seed directory or volume
    pub fn from_files(files: &SeedFiles) -> Result<Self, CloudInitError> {
        let metadata = match files.get("meta-data") {
            Some(raw) => parse_metadata(raw)?,
            None => Mapping::new(),
        };
        let network_config = match files.get("network-config") {
            Some(raw) => parse_yaml(raw)?,
            None => None,
        };

        Ok(Self {
            metadata,
            user_data: files.get("user-data").cloned(),
            vendor_data: files.get("vendor-data").cloned(),
            network_config,
        })
    }
}

/// Parse a YAML document; an empty or `null` document yields `None`
pub fn parse_yaml(raw: &str) -> Result<Option<Value>, CloudInitError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_yaml::from_str(raw)
        .map_err(|e| CloudInitError::Config(format!("invalid YAML seed data: {}", e)))?;
    Ok(match value {
        Value::Null => None,
        v => Some(v),
    })
}

/// Parse `meta-data`, which must be a mapping when non-empty
pub fn parse_metadata(raw: &str) -> Result<Mapping, CloudInitError> {
    metadata_from_value(parse_yaml(raw)?)
}

/// Accept metadata supplied either as a mapping or as YAML text
pub fn metadata_from_value(value: Option<Value>) -> Result<Mapping, CloudInitError> {
    match value {
        None => Ok(Mapping::new()),
        Some(Value::Mapping(m)) => Ok(m),
        Some(Value::String(s)) => parse_metadata(&s),
        Some(other) => Err(CloudInitError::Config(format!(
            "meta-data must be a mapping, got {:?}",
            other
        ))),
    }
}

/// Read seed files from a directory.
///
/// Returns `None` when any required file is missing.
pub async fn read_seed_files(
    dir: impl AsRef<Path>,
    required: &[&str],
    optional: &[&str],
) -> Result<Option<SeedFiles>, CloudInitError> {
    let dir = dir.as_ref();
    let mut files = SeedFiles::new();

    for name in required {
        match fs::read_to_string(dir.join(name)).await {
            Ok(content) => {
                files.insert(name.to_string(), content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }

    for name in optional {
        match fs::read_to_string(dir.join(name)).await {
            Ok(content) => {
                files.insert(name.to_string(), content);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Some(files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_dsmode_parse() {
        assert_eq!(DsMode::parse("local"), Some(DsMode::Local));
        assert_eq!(DsMode::parse("net"), Some(DsMode::Network));
        assert_eq!(DsMode::parse("Network"), Some(DsMode::Network));
        assert_eq!(DsMode::parse("disabled"), Some(DsMode::Disabled));
        assert_eq!(DsMode::parse("pass"), None);
    }

    #[test]
    fn test_dsmode_from_seedfrom() {
        assert_eq!(DsMode::from_seedfrom("http://10.0.0.1/"), Some(DsMode::Network));
        assert_eq!(DsMode::from_seedfrom("ftps://host/seed/"), Some(DsMode::Network));
        assert_eq!(DsMode::from_seedfrom("file:///seed/"), Some(DsMode::Local));
        assert_eq!(DsMode::from_seedfrom("/var/seed/"), Some(DsMode::Local));
        assert_eq!(DsMode::from_seedfrom("tftp://x/"), None);
    }

    #[test]
    fn test_merge_replaces_keys_shallowly() {
        let base = SeedBundle {
            metadata: mapping("instance-id: a\nnested: {x: 1, y: 2}"),
            ..Default::default()
        };
        let merged = base.merged(SeedContribution::metadata(mapping("nested: {x: 3}")));

        assert_eq!(merged.instance_id(), Some("a"));
        assert_eq!(merged.metadata["nested"], serde_yaml::from_str::<Value>("{x: 3}").unwrap());
    }

    #[test]
    fn test_merge_keeps_user_data_over_empty() {
        let base = SeedBundle {
            user_data: "#cloud-config\n".to_string(),
            ..Default::default()
        };
        let merged = base.merged(SeedContribution {
            user_data: Some(String::new()),
            vendor_data: Some("vendor".to_string()),
            ..Default::default()
        });

        assert_eq!(merged.user_data, "#cloud-config\n");
        assert_eq!(merged.vendor_data, "vendor");
    }

    #[test]
    fn test_defaults_only_fill_missing() {
        let bundle = SeedBundle {
            metadata: mapping("instance-id: mine"),
            ..Default::default()
        }
        .with_defaults(mapping("instance-id: nocloud\ndsmode: net"));

        assert_eq!(bundle.instance_id(), Some("mine"));
        assert_eq!(bundle.get_str("dsmode"), Some("net"));
    }

    #[test]
    fn test_parse_metadata_rejects_scalars() {
        assert!(parse_metadata("").unwrap().is_empty());
        assert!(matches!(
            parse_metadata("- a\n- b"),
            Err(CloudInitError::Config(_))
        ));
        assert!(matches!(
            parse_metadata("key: [unclosed"),
            Err(CloudInitError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_read_seed_files_requires_all() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("meta-data"), "instance-id: x\n")
            .await
            .unwrap();

        let missing = read_seed_files(temp.path(), REQUIRED_SEED_FILES, OPTIONAL_SEED_FILES)
            .await
            .unwrap();
        assert!(missing.is_none());

        fs::write(temp.path().join("user-data"), "").await.unwrap();
        fs::write(temp.path().join("network-config"), "version: 2\n")
            .await
            .unwrap();

        let files = read_seed_files(temp.path(), REQUIRED_SEED_FILES, OPTIONAL_SEED_FILES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(files.len(), 3);
        assert!(!files.contains_key("vendor-data"));

        let contribution = SeedContribution::from_files(&files).unwrap();
        assert_eq!(contribution.metadata["instance-id"], Value::from("x"));
        assert!(contribution.network_config.is_some());
    }
}
