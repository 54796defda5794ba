//! cloud-init-seed library
//!
//! Datasource seed discovery and hotplug handling for cloud instances.
//!
//! - [`seed`] resolves NoCloud seeds from DMI, the kernel command line,
//!   seed directories, static config, labeled volumes and `seedfrom` URLs.
//! - [`datasources`] wraps seed sources as datasources, selected per boot
//!   stage from an explicit registry and cached for later restores.
//! - [`hotplug`] reacts to device-attach events with bounded retries.
//!
//! # Design Principles
//!
//! - **Safety First**: No unsafe code (`#![forbid(unsafe_code)]`)
//! - **Fast Boot**: async I/O, no work beyond what the stage needs
//! - **Backwards Compatible**: Reads existing NoCloud seeds and `cloud.cfg`

pub mod config;
pub mod datasources;
pub mod distro;
pub mod event;
pub mod hotplug;
pub mod network;
pub mod seed;
pub mod stages;
pub mod state;

mod error;

pub use error::CloudInitError;

use stages::StageContext;
use tracing::info;

/// Boot stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Local stage - runs before network is available
    /// Handles: filesystem-only datasources, early network config
    Local,
    /// Network stage - runs after network is configured
    /// Handles: network datasources, remote seeds
    Network,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Local => write!(f, "local"),
            Stage::Network => write!(f, "network"),
        }
    }
}

/// Run the specified stages in order.
///
/// A datasource found by the local stage is handed to the network stage.
pub async fn run_stages(stages: &[Stage], ctx: &StageContext) -> Result<(), CloudInitError> {
    let mut found = None;
    for stage in stages {
        info!("Starting stage: {}", stage);
        match stage {
            Stage::Local => found = stages::local::run(ctx).await?,
            Stage::Network => {
                stages::network::run(ctx, found.take()).await?;
            }
        }
        info!("Completed stage: {}", stage);
    }
    Ok(())
}
