//! systemd-networkd based distro

use async_trait::async_trait;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Distro, NetworkActivator};
use crate::CloudInitError;
use crate::network::parse_network_config;
use crate::network::render::{Renderer, networkd::NetworkdRenderer, write_rendered};

/// Default systemd-networkd configuration directory
pub const NETWORKD_DIR: &str = "/etc/systemd/network";

/// Activator using `networkctl`
#[derive(Debug, Default)]
pub struct NetworkctlActivator;

#[async_trait]
impl NetworkActivator for NetworkctlActivator {
    async fn bring_up_interface(&self, name: &str) -> Result<bool, CloudInitError> {
        debug!("Bringing up interface {}", name);
        let output = Command::new("networkctl")
            .args(["up", name])
            .output()
            .await
            .map_err(|e| CloudInitError::Command(format!("networkctl: {}", e)))?;

        if !output.status.success() {
            warn!(
                "networkctl up {} failed: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// Distro that renders networkd units
#[derive(Debug)]
pub struct NetworkdDistro {
    output_dir: PathBuf,
    activator: NetworkctlActivator,
}

impl NetworkdDistro {
    pub fn new() -> Self {
        Self::with_output_dir(NETWORKD_DIR)
    }

    /// Write units somewhere other than /etc/systemd/network
    pub fn with_output_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: dir.as_ref().to_path_buf(),
            activator: NetworkctlActivator,
        }
    }

    async fn reload(&self) {
        match Command::new("networkctl").arg("reload").output().await {
            Ok(o) if o.status.success() => info!("systemd-networkd reloaded"),
            Ok(o) => debug!("networkctl reload failed: {}", String::from_utf8_lossy(&o.stderr).trim()),
            Err(e) => debug!("networkctl not available: {}", e),
        }
    }
}

impl Default for NetworkdDistro {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Distro for NetworkdDistro {
    fn name(&self) -> &str {
        "networkd"
    }

    async fn apply_network_config(&self, config: &Value, bring_up: bool) -> Result<(), CloudInitError> {
        let config = parse_network_config(config)?;
        let files = NetworkdRenderer::new().render(&config)?;
        write_rendered(&self.output_dir, &files).await?;
        self.reload().await;

        if bring_up {
            for name in config.ethernets.keys() {
                if !self.activator.bring_up_interface(name).await? {
                    warn!("Failed to bring up {}", name);
                }
            }
        }
        Ok(())
    }

    fn network_activator(&self) -> &dyn NetworkActivator {
        &self.activator
    }
}
