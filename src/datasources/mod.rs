//! Datasources
//!
//! A datasource discovers instance metadata and user data for one platform.
//! Datasources are listed in an explicit [`Registry`] together with the boot
//! dependencies they need; each stage asks the registry for the entries
//! matching its own dependencies and takes the first that claims the
//! instance.

pub mod extra_config;
pub mod mock;
pub mod nocloud;
pub mod softlayer;

use async_trait::async_trait;
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::CloudInitError;
use crate::config::SystemConfig;
use crate::event::{EventScope, EventType, UpdateEvents, network_events};
use crate::seed::{DsMode, SeedBundle, SeedHost};
use crate::state::{CachedDatasource, CloudPaths, InstanceState};

/// How a datasource wants hotplug retries paced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HotplugRetrySettings {
    /// Retry full attempt sequences for `sleep_total`
    pub force_retry: bool,
    pub sleep_period: Duration,
    pub sleep_total: Duration,
}

/// Trait for cloud metadata datasources
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Name of this datasource (e.g., "NoCloud", "SoftLayer")
    fn name(&self) -> &'static str;

    /// Discover and load data.
    ///
    /// `Ok(false)` means this datasource does not apply to the instance.
    async fn get_data(&mut self) -> Result<bool, CloudInitError>;

    /// Data loaded by the last successful `get_data` or restore
    fn bundle(&self) -> &SeedBundle;

    fn dsmode(&self) -> DsMode;

    /// Where the data came from
    fn seed(&self) -> String {
        String::new()
    }

    /// Replace loaded data with a cached copy
    fn restore(&mut self, cached: &CachedDatasource);

    fn instance_id(&self) -> Option<&str> {
        self.bundle().instance_id()
    }

    fn network_config(&self) -> Option<&Value> {
        self.bundle().network_config.as_ref()
    }

    fn default_update_events(&self) -> UpdateEvents {
        network_events(&[EventType::BootNewInstance])
    }

    fn supported_update_events(&self) -> UpdateEvents {
        self.default_update_events()
    }

    /// Supported events among `events`, per scope. Scopes with no match are omitted.
    fn get_supported_events(&self, events: &[EventType]) -> UpdateEvents {
        self.supported_update_events()
            .into_iter()
            .filter_map(|(scope, supported)| {
                let matched: BTreeSet<EventType> = events.iter().copied().filter(|e| supported.contains(e)).collect();
                (!matched.is_empty()).then_some((scope, matched))
            })
            .collect()
    }

    /// Re-read metadata if any of `events` is supported.
    ///
    /// Returns whether fresh data was loaded.
    async fn update_metadata_if_supported(&mut self, events: &[EventType]) -> Result<bool, CloudInitError> {
        let supported = self.get_supported_events(events);
        for (scope, matched) in &supported {
            debug!(
                "Update datasource metadata and {} config due to events: {:?}",
                scope, matched
            );
            if self.get_data().await? {
                return Ok(true);
            }
        }
        debug!("Datasource {} not updated for events: {:?}", self.name(), events);
        Ok(false)
    }

    fn hotplug_retry_settings(&self) -> HotplugRetrySettings {
        HotplugRetrySettings::default()
    }

    /// Skip checking refreshed metadata for the hotplugged device
    fn skip_hotplug_detect(&self) -> bool {
        false
    }

    fn cache_entry(&self) -> CachedDatasource {
        CachedDatasource {
            dsname: self.name().to_string(),
            dsmode: self.dsmode(),
            seed: self.seed(),
            bundle: self.bundle().clone(),
        }
    }
}

/// Boot-time requirement of a datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dependency {
    Filesystem,
    Network,
}

/// Everything a datasource constructor may need
#[derive(Clone)]
pub struct DatasourceContext {
    pub config: SystemConfig,
    pub paths: CloudPaths,
    pub host: Arc<dyn SeedHost>,
}

pub type Constructor = fn(&DatasourceContext) -> Box<dyn Datasource>;

/// One registered datasource
#[derive(Clone)]
pub struct RegistryEntry {
    /// Datasource name, as stored in the cache
    pub name: &'static str,
    /// Name used in `datasource_list`
    pub list_name: &'static str,
    pub dependencies: &'static [Dependency],
    pub constructor: Constructor,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Explicit table of known datasources
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All datasources shipped with this crate
    pub fn builtin() -> Self {
        Self::new()
            .register(nocloud::NOCLOUD_ENTRY)
            .register(nocloud::NOCLOUD_NET_ENTRY)
            .register(extra_config::ENTRY)
            .register(softlayer::ENTRY)
    }

    pub fn register(mut self, entry: RegistryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries whose dependency set equals `depends`.
    ///
    /// With an allow-list, only listed entries are returned, in list order.
    pub fn list_from_depends(&self, depends: &[Dependency], allow: Option<&[String]>) -> Vec<&RegistryEntry> {
        let wanted: BTreeSet<Dependency> = depends.iter().copied().collect();
        let matching = self
            .entries
            .iter()
            .filter(|e| e.dependencies.iter().copied().collect::<BTreeSet<_>>() == wanted);

        match allow {
            None => matching.collect(),
            Some(names) => {
                let mut listed: Vec<(usize, &RegistryEntry)> = matching
                    .filter_map(|e| names.iter().position(|n| n == e.list_name).map(|i| (i, e)))
                    .collect();
                listed.sort_by_key(|(i, _)| *i);
                listed.into_iter().map(|(_, e)| e).collect()
            }
        }
    }
}

/// Try each datasource matching `depends` until one claims the instance
pub async fn discover(
    registry: &Registry,
    ctx: &DatasourceContext,
    depends: &[Dependency],
) -> Result<Box<dyn Datasource>, CloudInitError> {
    let candidates = registry.list_from_depends(depends, ctx.config.datasource_list.as_deref());
    debug!(
        "Searching for datasources: {:?}",
        candidates.iter().map(|e| e.name).collect::<Vec<_>>()
    );

    for entry in candidates {
        let mut ds = (entry.constructor)(ctx);
        match ds.get_data().await {
            Ok(true) => {
                info!("Detected datasource: {} [seed={}][dsmode={}]", ds.name(), ds.seed(), ds.dsmode());
                return Ok(ds);
            }
            Ok(false) => debug!("Datasource {} not applicable", entry.name),
            Err(e) => warn!("Datasource {} failed: {}", entry.name, e),
        }
    }

    Err(CloudInitError::NoDatasource)
}

/// Restore the cached datasource, falling back to discovery
pub async fn fetch_datasource(
    registry: &Registry,
    ctx: &DatasourceContext,
    state: &InstanceState,
    depends: &[Dependency],
) -> Result<Box<dyn Datasource>, CloudInitError> {
    if let Some(cached) = state.load_cache().await? {
        match registry.get(&cached.dsname) {
            Some(entry) => {
                let mut ds = (entry.constructor)(ctx);
                ds.restore(&cached);
                debug!("Restored cached datasource {} [seed={}]", cached.dsname, cached.seed);
                return Ok(ds);
            }
            None => warn!("Cached datasource {} is not registered", cached.dsname),
        }
    }

    discover(registry, ctx, depends).await
}

/// Whether `event` is enabled for `scope` on this datasource.
///
/// The datasource must support the event, and either it is a default
/// update event, the system config lists it under `updates`, or (for
/// hotplug) the scope was persisted as enabled.
pub fn update_event_enabled(
    ds: &dyn Datasource,
    config: &SystemConfig,
    enabled_scopes: &[String],
    event: EventType,
    scope: EventScope,
) -> bool {
    let supported = ds
        .get_supported_events(&[event])
        .get(&scope)
        .is_some_and(|s| s.contains(&event));
    if !supported {
        return false;
    }

    let default = ds
        .default_update_events()
        .get(&scope)
        .is_some_and(|s| s.contains(&event));
    let configured = config
        .update_events(scope.as_str())
        .iter()
        .any(|e| EventType::parse(e) == Some(event));
    let persisted = event == EventType::Hotplug && enabled_scopes.iter().any(|s| s == scope.as_str());

    debug!(
        "Event {} for scope {}: default={} configured={} persisted={}",
        event, scope, default, configured, persisted
    );
    default || configured || persisted
}
