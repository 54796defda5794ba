//! Boot stages
//!
//! Stages run in order during boot:
//! 1. Local - before network, datasources that only need the filesystem
//! 2. Network - after network is up, datasources that also need networking
//!
//! Each stage selects a datasource, caches it for later trusted restores
//! (hotplug, `query`) and applies its network configuration.

pub mod local;
pub mod network;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::CloudInitError;
use crate::datasources::{Datasource, DatasourceContext, Registry};
use crate::distro::Distro;
use crate::state::InstanceState;

/// Everything the stages share
pub struct StageContext {
    pub datasources: DatasourceContext,
    pub registry: Registry,
    pub distro: Arc<dyn Distro>,
    pub state: InstanceState,
}

impl StageContext {
    pub fn new(datasources: DatasourceContext, distro: Arc<dyn Distro>) -> Self {
        let state = InstanceState::with_paths(datasources.paths.clone());
        Self {
            datasources,
            registry: Registry::builtin(),
            distro,
            state,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }
}

/// Cache the datasource and apply its network config
async fn persist_and_apply(ctx: &StageContext, ds: &dyn Datasource, bring_up: bool) -> Result<(), CloudInitError> {
    ctx.state.write_cache(&ds.cache_entry()).await?;

    match ds.network_config() {
        Some(config) => {
            info!("Applying network configuration from {}", ds.name());
            if let Err(e) = ctx.distro.apply_network_config(config, bring_up).await {
                warn!("Failed to apply network configuration: {}", e);
            }
        }
        None => debug!("Datasource {} provided no network configuration", ds.name()),
    }
    Ok(())
}
