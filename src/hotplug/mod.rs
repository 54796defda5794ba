//! Hotplug event handling
//!
//! A udev rule calls `cloud-init-seed hotplug-hook` when a device is
//! attached. The [`coordinator`] refreshes metadata through the cached
//! datasource, checks that the new device is described there, applies the
//! configuration and records the result, retrying while the metadata
//! service catches up.
//!
//! Subsystems are a closed set. Each variant carries its own event scope,
//! device identifier, detection and apply logic.

pub mod coordinator;
pub mod installer;
pub mod net;
pub mod retry;

pub use coordinator::{EnableOutcome, HandleOutcome, HotplugCoordinator, QueryOutcome, SuccessRecorder};
pub use installer::{HookInstaller, UdevHookInstaller};
pub use retry::{Clock, ManualClock, RetryState, Step, TokioClock, WAIT_TIMES};

use nix::unistd::Uid;
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::CloudInitError;
use crate::distro::Distro;
use crate::event::EventScope;
use crate::network::config_has_mac;

/// Subsystems that emit hotplug events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Net,
}

impl Subsystem {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "net" => Some(Self::Net),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Net => "net",
        }
    }

    /// Configuration scope gated by this subsystem
    pub fn scope(&self) -> EventScope {
        match self {
            Self::Net => EventScope::Network,
        }
    }

    /// Stable identifier of the device at `devpath`, if readable
    pub async fn device_identifier(&self, sys_root: &Path, devpath: &Path) -> Option<String> {
        match self {
            Self::Net => net::read_mac_address(sys_root, &device_name(devpath)).await,
        }
    }

    /// Whether refreshed metadata describes the device
    pub fn device_detected(&self, config: Option<&Value>, id: &str) -> bool {
        match self {
            Self::Net => {
                let found = config.is_some_and(|config| config_has_mac(config, id));
                debug!("Interface with ID={} present: {}", id, found);
                found
            }
        }
    }

    /// Apply configuration for the new device
    pub async fn apply(
        &self,
        distro: &dyn Distro,
        config: Option<&Value>,
        devpath: &Path,
        action: Action,
    ) -> Result<(), CloudInitError> {
        match self {
            Self::Net => {
                let config = config.ok_or_else(|| {
                    CloudInitError::TransientMetadata("datasource has no network config".into())
                })?;
                distro.apply_network_config(config, false).await?;

                let name = device_name(devpath);
                if action == Action::Add && !distro.network_activator().bring_up_interface(&name).await? {
                    return Err(CloudInitError::Command(format!(
                        "Failed to bring up device: {}",
                        devpath.display()
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// udev action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Self::Add),
            _ => None,
        }
    }

    /// Whether the device must be present in refreshed metadata
    pub fn expects_present(&self) -> bool {
        match self {
            Self::Add => true,
        }
    }
}

/// One device-attach notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub subsystem: Subsystem,
    pub devpath: PathBuf,
    pub action: Action,
    /// e.g. the MAC address for `net`; `None` when sysfs had nothing
    pub device_id: Option<String>,
}

impl HotplugEvent {
    /// Build an event, reading the device identifier under `sys_root`
    pub async fn detect(subsystem: Subsystem, devpath: &Path, action: Action, sys_root: &Path) -> Self {
        let device_id = subsystem.device_identifier(sys_root, devpath).await;
        Self {
            subsystem,
            devpath: devpath.to_path_buf(),
            action,
            device_id,
        }
    }

    /// Identifier used in log and error messages
    pub fn id(&self) -> &str {
        self.device_id.as_deref().unwrap_or("<unknown>")
    }
}

/// Last component of a sysfs device path
fn device_name(devpath: &Path) -> String {
    devpath
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reject callers whose effective uid is not root
pub fn require_root() -> Result<(), CloudInitError> {
    if Uid::effective().is_root() {
        return Ok(());
    }
    Err(CloudInitError::Permission(
        "Root is required. Try prepending your command with sudo.".into(),
    ))
}
