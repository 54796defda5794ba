//! Installation of the udev hook that forwards hotplug events

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{info, warn};

use super::Subsystem;
use crate::CloudInitError;

/// Default udev rules directory
pub const UDEV_RULES_DIR: &str = "/etc/udev/rules.d";

/// Name of the installed rule file
pub const HOTPLUG_RULE_FILE: &str = "90-cloud-init-hook-hotplug.rules";

/// One-time system hook installation
#[async_trait]
pub trait HookInstaller: Send + Sync {
    async fn install(&self, subsystem: Subsystem) -> Result<(), CloudInitError>;
}

/// Rule body for `subsystem`
pub fn hotplug_rule(subsystem: Subsystem, program: &str) -> String {
    format!(
        "# Installed by cloud-init-seed due to hotplug enablement\n\
         ACTION!=\"add\", GOTO=\"cloudinit_end\"\n\
         SUBSYSTEM==\"{sub}\", RUN+=\"{program} hotplug-hook --subsystem {sub} handle --devpath %p --udevaction %E{{ACTION}}\"\n\
         LABEL=\"cloudinit_end\"\n",
        sub = subsystem.as_str(),
        program = program,
    )
}

/// Writes a udev rule and reloads udev
#[derive(Debug, Clone)]
pub struct UdevHookInstaller {
    rules_dir: PathBuf,
    program: String,
    reload: bool,
}

impl UdevHookInstaller {
    pub fn new() -> Self {
        Self {
            rules_dir: PathBuf::from(UDEV_RULES_DIR),
            program: "/usr/bin/cloud-init-seed".to_string(),
            reload: true,
        }
    }

    /// Write rules elsewhere and skip `udevadm` (useful for testing)
    pub fn with_rules_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            rules_dir: dir.as_ref().to_path_buf(),
            reload: false,
            ..Self::new()
        }
    }

    pub fn rule_path(&self) -> PathBuf {
        self.rules_dir.join(HOTPLUG_RULE_FILE)
    }

    async fn reload_rules(&self) -> Result<(), CloudInitError> {
        let output = Command::new("udevadm")
            .args(["control", "--reload-rules"])
            .output()
            .await
            .map_err(|e| CloudInitError::Command(format!("udevadm: {}", e)))?;

        if !output.status.success() {
            warn!(
                "udevadm control --reload-rules failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Default for UdevHookInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookInstaller for UdevHookInstaller {
    async fn install(&self, subsystem: Subsystem) -> Result<(), CloudInitError> {
        let path = self.rule_path();
        info!("Installing hotplug rule {}", path.display());

        fs::create_dir_all(&self.rules_dir).await?;
        fs::write(&path, hotplug_rule(subsystem, &self.program)).await?;

        if self.reload {
            self.reload_rules().await?;
        }
        Ok(())
    }
}
