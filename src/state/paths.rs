//! Standard cloud-init paths
//!
//! Defines the directory structure used for seeds, caches and hotplug state.

use std::path::{Path, PathBuf};

/// Base directory for cloud-init state
pub const CLOUD_DIR: &str = "/var/lib/cloud";

/// Cloud configuration directory
pub const CONFIG_DIR: &str = "/etc/cloud";

/// Runtime directory (tmpfs)
pub const RUN_DIR: &str = "/run/cloud-init";

/// Standard cloud-init paths
#[derive(Debug, Clone)]
pub struct CloudPaths {
    /// Base cloud directory (default: /var/lib/cloud)
    pub base: PathBuf,
    /// Config directory (default: /etc/cloud)
    pub config: PathBuf,
    /// Runtime directory (default: /run/cloud-init)
    pub run: PathBuf,
}

impl Default for CloudPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudPaths {
    /// Create with default paths
    pub fn new() -> Self {
        Self {
            base: PathBuf::from(CLOUD_DIR),
            config: PathBuf::from(CONFIG_DIR),
            run: PathBuf::from(RUN_DIR),
        }
    }

    /// Create with custom base directory (useful for testing)
    pub fn with_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            run: base.join("run"),
            base,
            config: PathBuf::from(CONFIG_DIR),
        }
    }

    /// Create with custom base and config directories
    pub fn with_dirs(base: impl AsRef<Path>, config: impl AsRef<Path>) -> Self {
        Self {
            config: config.as_ref().to_path_buf(),
            ..Self::with_base(base)
        }
    }

    // ==================== Base Directories ====================

    /// /var/lib/cloud/data - Cached data directory
    pub fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    /// /var/lib/cloud/instances - All instances directory
    pub fn instances_dir(&self) -> PathBuf {
        self.base.join("instances")
    }

    /// /var/lib/cloud/instance - Symlink to current instance
    pub fn instance_link(&self) -> PathBuf {
        self.base.join("instance")
    }

    /// /var/lib/cloud/seed - Seed directory root
    pub fn seed_dir(&self) -> PathBuf {
        self.base.join("seed")
    }

    /// /var/lib/cloud/hotplug.enabled - Scopes with hotplug enabled
    pub fn hotplug_enabled_file(&self) -> PathBuf {
        self.base.join("hotplug.enabled")
    }

    /// /run/cloud-init/tmp - Scratch mount points for seed volumes
    pub fn mount_tmp_dir(&self) -> PathBuf {
        self.run.join("tmp")
    }

    // ==================== Instance-specific Paths ====================

    /// /var/lib/cloud/instances/<id> - Instance directory
    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.instances_dir().join(instance_id)
    }

    /// /var/lib/cloud/instances/<id>/obj.json - Cached datasource
    pub fn datasource_cache(&self, instance_id: &str) -> PathBuf {
        self.instance_dir(instance_id).join("obj.json")
    }

    // ==================== Config Paths ====================

    /// /etc/cloud/cloud.cfg - Main config file
    pub fn main_config(&self) -> PathBuf {
        self.config.join("cloud.cfg")
    }

    /// /etc/cloud/cloud.cfg.d - Config drop-in directory
    pub fn config_d(&self) -> PathBuf {
        self.config.join("cloud.cfg.d")
    }

    // ==================== Data Paths ====================

    /// /var/lib/cloud/data/instance-id - Cached instance ID
    pub fn cached_instance_id(&self) -> PathBuf {
        self.data_dir().join("instance-id")
    }

    /// /var/lib/cloud/data/previous-instance-id - Previous instance ID
    pub fn previous_instance_id(&self) -> PathBuf {
        self.data_dir().join("previous-instance-id")
    }
}
