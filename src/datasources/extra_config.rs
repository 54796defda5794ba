//! ExtraConfig datasource
//!
//! Reads metadata and user data from VMware `guestinfo` keys through
//! `vmtoolsd`. Metadata is an `&`-separated list of `key=value` pairs
//! (RightScale format).

use async_trait::async_trait;
use serde_yaml::Mapping;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Datasource, DatasourceContext, Dependency, RegistryEntry};
use crate::CloudInitError;
use crate::config::ExtraConfigSettings;
use crate::seed::{DsMode, SeedBundle, SeedHost};
use crate::state::CachedDatasource;

/// Instance id when the metadata carries none
pub const DEFAULT_INSTANCE_ID: &str = "iid-dsextraconfig";

pub const ENTRY: RegistryEntry = RegistryEntry {
    name: "ExtraConfig",
    list_name: "ExtraConfig",
    dependencies: &[Dependency::Filesystem, Dependency::Network],
    constructor: new_extra_config,
};

fn new_extra_config(ctx: &DatasourceContext) -> Box<dyn Datasource> {
    Box::new(ExtraConfig::new(
        ctx.config.datasource.extra_config.clone(),
        Arc::clone(&ctx.host),
    ))
}

/// Parse `k1=v1&k2=v2`. Pairs without exactly one `=` are dropped.
pub fn parse_metadata(raw: &str) -> Mapping {
    let mut md = Mapping::new();
    for pair in raw.split('&') {
        let parts: Vec<&str> = pair.split('=').collect();
        if let [name, value] = parts.as_slice() {
            md.insert(name.trim().into(), value.trim().into());
        }
    }
    md
}

pub struct ExtraConfig {
    settings: ExtraConfigSettings,
    host: Arc<dyn SeedHost>,
    bundle: SeedBundle,
}

impl ExtraConfig {
    pub fn new(settings: ExtraConfigSettings, host: Arc<dyn SeedHost>) -> Self {
        Self {
            settings,
            host,
            bundle: SeedBundle::default(),
        }
    }

    /// A guestinfo value, `None` when vmtoolsd is missing or the key is empty
    async fn fetch_extra_config(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        match self.host.guestinfo(key).await {
            Ok(Some(value)) if !value.is_empty() => Ok(Some(value)),
            Ok(_) => {
                debug!("The extra config key guestinfo.{} contains no value", key);
                Ok(None)
            }
            Err(e) if e.is_not_applicable() => {
                debug!("ExtraConfig: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Datasource for ExtraConfig {
    fn name(&self) -> &'static str {
        "ExtraConfig"
    }

    async fn get_data(&mut self) -> Result<bool, CloudInitError> {
        let Some(md_raw) = self.fetch_extra_config("metadata").await? else {
            return Ok(false);
        };
        let Some(ud_raw) = self.fetch_extra_config("userdata").await? else {
            return Ok(false);
        };

        let mut metadata = parse_metadata(&md_raw);
        if self.settings.metadata_format == "rightscale" {
            match metadata.get("vs_instance_id").cloned() {
                Some(id) => {
                    metadata.insert("instance-id".into(), id);
                }
                None => warn!("RightScale metadata has no vs_instance_id"),
            }
        }
        if !metadata.contains_key("instance-id") {
            metadata.insert("instance-id".into(), DEFAULT_INSTANCE_ID.into());
        }

        self.bundle = SeedBundle {
            metadata,
            user_data: ud_raw,
            ..Default::default()
        };
        Ok(true)
    }

    fn bundle(&self) -> &SeedBundle {
        &self.bundle
    }

    fn dsmode(&self) -> DsMode {
        DsMode::Local
    }

    fn seed(&self) -> String {
        "guestinfo".to_string()
    }

    fn restore(&mut self, cached: &CachedDatasource) {
        self.bundle = cached.bundle.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::fake::FakeSeedHost;
    use serde_yaml::Value;

    fn extra_config(host: FakeSeedHost) -> ExtraConfig {
        ExtraConfig::new(ExtraConfigSettings::default(), Arc::new(host))
    }

    #[test]
    fn test_parse_metadata_pairs() {
        let md = parse_metadata("vs_instance_id=i-42& region = east &broken&a=b=c");
        assert_eq!(md.len(), 2);
        assert_eq!(md["vs_instance_id"], Value::from("i-42"));
        assert_eq!(md["region"], Value::from("east"));
    }

    #[tokio::test]
    async fn test_rightscale_instance_id() {
        let host = FakeSeedHost::new()
            .with_guestinfo("metadata", "vs_instance_id=i-42&zone=a")
            .with_guestinfo("userdata", "#!/bin/sh\n");
        let mut ds = extra_config(host);

        assert!(ds.get_data().await.unwrap());
        assert_eq!(ds.instance_id(), Some("i-42"));
        assert_eq!(ds.bundle().user_data, "#!/bin/sh\n");
        assert_eq!(ds.dsmode(), DsMode::Local);
    }

    #[tokio::test]
    async fn test_default_instance_id() {
        let host = FakeSeedHost::new()
            .with_guestinfo("metadata", "zone=a")
            .with_guestinfo("userdata", "data");
        let mut ds = extra_config(host);

        assert!(ds.get_data().await.unwrap());
        assert_eq!(ds.instance_id(), Some(DEFAULT_INSTANCE_ID));
    }

    #[tokio::test]
    async fn test_missing_userdata_not_applicable() {
        let host = FakeSeedHost::new().with_guestinfo("metadata", "vs_instance_id=i-1");
        let mut ds = extra_config(host);
        assert!(!ds.get_data().await.unwrap());
    }
}
