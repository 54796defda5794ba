//! Instance state management
//!
//! Manages the /var/lib/cloud directory structure including:
//! - Instance tracking (current vs previous)
//! - The cached datasource selected by the boot stages
//! - Hotplug enablement state

pub mod hotplug;
pub mod paths;

pub use hotplug::HotplugEnabledState;
pub use paths::CloudPaths;

use crate::CloudInitError;
use crate::seed::{DsMode, SeedBundle};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

/// Serialized form of the datasource selected for this instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDatasource {
    /// Registry name of the datasource (e.g. "NoCloud")
    pub dsname: String,
    pub dsmode: DsMode,
    /// Comma-joined provenance of the seed
    pub seed: String,
    pub bundle: SeedBundle,
}

impl CachedDatasource {
    pub fn instance_id(&self) -> Option<&str> {
        self.bundle.instance_id()
    }
}

/// Instance state manager
#[derive(Debug, Clone, Default)]
pub struct InstanceState {
    paths: CloudPaths,
}

impl InstanceState {
    /// Create a new instance state manager with default paths
    pub fn new() -> Self {
        Self {
            paths: CloudPaths::new(),
        }
    }

    /// Create with custom paths (useful for testing)
    pub fn with_paths(paths: CloudPaths) -> Self {
        Self { paths }
    }

    /// Get the paths configuration
    pub fn paths(&self) -> &CloudPaths {
        &self.paths
    }

    /// Record the current instance ID. Returns true for a new instance.
    pub async fn set_instance_id(&self, instance_id: &str) -> Result<bool, CloudInitError> {
        let is_new_instance = self.check_instance_change(instance_id).await?;

        fs::create_dir_all(self.paths.instance_dir(instance_id)).await?;
        fs::create_dir_all(self.paths.data_dir()).await?;
        self.update_instance_link(instance_id).await?;
        fs::write(self.paths.cached_instance_id(), instance_id).await?;

        if is_new_instance {
            info!("New instance detected: {}", instance_id);
        }
        Ok(is_new_instance)
    }

    /// Check if the instance has changed
    async fn check_instance_change(&self, new_id: &str) -> Result<bool, CloudInitError> {
        let cached_path = self.paths.cached_instance_id();

        if cached_path.exists() {
            let cached_id = fs::read_to_string(&cached_path).await?;
            let cached_id = cached_id.trim();

            if cached_id != new_id {
                fs::write(self.paths.previous_instance_id(), cached_id).await?;
                return Ok(true);
            }
            return Ok(false);
        }

        Ok(true)
    }

    /// Update the /var/lib/cloud/instance symlink
    async fn update_instance_link(&self, instance_id: &str) -> Result<(), CloudInitError> {
        let link_path = self.paths.instance_link();
        let target = self.paths.instance_dir(instance_id);

        if link_path.exists() || link_path.is_symlink() {
            fs::remove_file(&link_path).await.ok();
        }

        #[cfg(unix)]
        {
            fs::symlink(&target, &link_path).await?;
            debug!(
                "Created instance symlink: {} -> {}",
                link_path.display(),
                target.display()
            );
        }

        #[cfg(not(unix))]
        {
            fs::write(&link_path, target.to_string_lossy().as_bytes()).await?;
        }

        Ok(())
    }

    /// Load cached instance ID from disk
    pub async fn load_cached_instance_id(&self) -> Result<Option<String>, CloudInitError> {
        let path = self.paths.cached_instance_id();
        if path.exists() {
            let id = fs::read_to_string(&path).await?;
            let id = id.trim().to_string();
            if !id.is_empty() {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Persist the selected datasource for later trusted restores
    pub async fn write_cache(&self, entry: &CachedDatasource) -> Result<(), CloudInitError> {
        let instance_id = entry.instance_id().ok_or_else(|| {
            CloudInitError::Config("cannot cache a datasource without instance-id".into())
        })?;
        self.set_instance_id(instance_id).await?;

        let path = self.paths.datasource_cache(instance_id);
        let json = serde_json::to_string_pretty(entry)?;
        fs::write(&path, json)
            .await
            .map_err(|e| CloudInitError::persistent_state(path.display().to_string(), e))?;
        debug!("Cached datasource {} to {}", entry.dsname, path.display());
        Ok(())
    }

    /// Restore the cached datasource, if any. A corrupt cache is treated as absent.
    pub async fn load_cache(&self) -> Result<Option<CachedDatasource>, CloudInitError> {
        let Some(instance_id) = self.load_cached_instance_id().await? else {
            return Ok(None);
        };

        let path = self.paths.datasource_cache(&instance_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Ignoring unreadable datasource cache {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}
