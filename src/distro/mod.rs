//! Distro integration
//!
//! The parts of a distribution the core drives directly: writing network
//! configuration and bringing interfaces up.

pub mod mock;
pub mod networkd;

pub use networkd::{NetworkctlActivator, NetworkdDistro};

use crate::CloudInitError;
use async_trait::async_trait;
use serde_yaml::Value;

/// Brings individual interfaces up
#[async_trait]
pub trait NetworkActivator: Send + Sync {
    /// Returns false when the interface could not be brought up
    async fn bring_up_interface(&self, name: &str) -> Result<bool, CloudInitError>;
}

/// Distribution-specific system configuration
#[async_trait]
pub trait Distro: Send + Sync {
    fn name(&self) -> &str;

    /// Render and write a structured (v1 or v2) network config
    async fn apply_network_config(&self, config: &Value, bring_up: bool) -> Result<(), CloudInitError>;

    fn network_activator(&self) -> &dyn NetworkActivator;
}
