//! NoCloud datasource
//!
//! Reads metadata and user data from local seed directories, a labeled
//! volume (`cidata`), the kernel command line, DMI, static config, or a
//! `seedfrom` location. Two variants share the implementation:
//! - `NoCloud` runs before networking and only follows local `seedfrom`s
//! - `NoCloudNet` runs after networking and follows HTTP(S)/FTP(S) `seedfrom`s
//!
//! Common locations:
//! - /var/lib/cloud/seed/nocloud/
//! - /var/lib/cloud/seed/nocloud-net/
//! - Filesystem labeled 'cidata' or 'CIDATA'

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Datasource, DatasourceContext, Dependency, RegistryEntry};
use crate::CloudInitError;
use crate::config::NoCloudSettings;
use crate::event::{EventType, UpdateEvents, network_events};
use crate::seed::resolver::{LOCAL_SEED_STARTS, NETWORK_SEED_STARTS};
use crate::seed::{DsMode, Resolution, SeedBundle, SeedHost, SeedPolicy, SeedResolver};
use crate::state::{CachedDatasource, CloudPaths};

/// Timeout for a network `seedfrom` fetch
const SEED_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const NOCLOUD_ENTRY: RegistryEntry = RegistryEntry {
    name: "NoCloud",
    list_name: "NoCloud",
    dependencies: &[Dependency::Filesystem],
    constructor: new_local,
};

pub const NOCLOUD_NET_ENTRY: RegistryEntry = RegistryEntry {
    name: "NoCloudNet",
    list_name: "NoCloud",
    dependencies: &[Dependency::Filesystem, Dependency::Network],
    constructor: new_net,
};

fn new_local(ctx: &DatasourceContext) -> Box<dyn Datasource> {
    Box::new(NoCloud::from_context(NoCloudVariant::Local, ctx))
}

fn new_net(ctx: &DatasourceContext) -> Box<dyn Datasource> {
    Box::new(NoCloud::from_context(NoCloudVariant::Net, ctx))
}

/// Boot stage a NoCloud instance serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCloudVariant {
    Local,
    Net,
}

/// NoCloud datasource for seed-based configuration
pub struct NoCloud {
    variant: NoCloudVariant,
    settings: NoCloudSettings,
    host: Arc<dyn SeedHost>,
    paths: CloudPaths,
    bundle: SeedBundle,
    dsmode: DsMode,
    seed: String,
}

impl NoCloud {
    pub fn new(variant: NoCloudVariant, settings: NoCloudSettings, host: Arc<dyn SeedHost>, paths: CloudPaths) -> Self {
        Self {
            variant,
            settings,
            host,
            paths,
            bundle: SeedBundle::default(),
            dsmode: DsMode::Network,
            seed: String::new(),
        }
    }

    pub fn from_context(variant: NoCloudVariant, ctx: &DatasourceContext) -> Self {
        Self::new(
            variant,
            ctx.config.datasource.nocloud.clone(),
            Arc::clone(&ctx.host),
            ctx.paths.clone(),
        )
    }

    fn default_dsmode(&self) -> Result<DsMode, CloudInitError> {
        match &self.settings.dsmode {
            None => Ok(DsMode::Network),
            Some(s) => DsMode::parse(s)
                .ok_or_else(|| CloudInitError::Config(format!("invalid datasource dsmode: {}", s))),
        }
    }

    fn policy(&self) -> Result<SeedPolicy, CloudInitError> {
        let seed_dir = self.paths.seed_dir();
        let (supported_seed_starts, network_stage, fetch_timeout) = match self.variant {
            NoCloudVariant::Local => (LOCAL_SEED_STARTS, false, None),
            NoCloudVariant::Net => (NETWORK_SEED_STARTS, true, Some(SEED_FETCH_TIMEOUT)),
        };

        Ok(SeedPolicy {
            dsname: self.name(),
            seed_dirs: vec![seed_dir.join("nocloud"), seed_dir.join("nocloud-net")],
            supported_seed_starts,
            default_dsmode: self.default_dsmode()?,
            network_stage,
            fetch_timeout,
        })
    }
}

#[async_trait]
impl Datasource for NoCloud {
    fn name(&self) -> &'static str {
        match self.variant {
            NoCloudVariant::Local => "NoCloud",
            NoCloudVariant::Net => "NoCloudNet",
        }
    }

    async fn get_data(&mut self) -> Result<bool, CloudInitError> {
        let policy = self.policy()?;
        let resolution = SeedResolver::new(self.host.as_ref(), &self.settings, &policy)
            .resolve()
            .await?;

        match resolution {
            Resolution::Found(resolved) => {
                self.seed = resolved.seed();
                self.dsmode = resolved.dsmode;
                self.bundle = resolved.bundle;
                Ok(true)
            }
            Resolution::NotFound => {
                debug!("{}: no usable seed", self.name());
                Ok(false)
            }
        }
    }

    fn bundle(&self) -> &SeedBundle {
        &self.bundle
    }

    fn dsmode(&self) -> DsMode {
        self.dsmode
    }

    fn seed(&self) -> String {
        self.seed.clone()
    }

    fn restore(&mut self, cached: &CachedDatasource) {
        self.bundle = cached.bundle.clone();
        self.dsmode = cached.dsmode;
        self.seed = cached.seed.clone();
    }

    fn supported_update_events(&self) -> UpdateEvents {
        network_events(&[
            EventType::BootNewInstance,
            EventType::Boot,
            EventType::BootLegacy,
            EventType::Hotplug,
        ])
    }
}
