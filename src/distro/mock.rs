//! Mock distro for testing
//!
//! Records every call instead of touching the system.

use async_trait::async_trait;
use serde_yaml::Value;
use std::sync::Mutex;

use super::{Distro, NetworkActivator};
use crate::CloudInitError;

/// Activator that records interface names
#[derive(Debug)]
pub struct MockActivator {
    succeed: bool,
    brought_up: Mutex<Vec<String>>,
}

#[async_trait]
impl NetworkActivator for MockActivator {
    async fn bring_up_interface(&self, name: &str) -> Result<bool, CloudInitError> {
        if let Ok(mut up) = self.brought_up.lock() {
            up.push(name.to_string());
        }
        Ok(self.succeed)
    }
}

/// Mock distro
///
/// # Example
/// ```
/// use cloud_init_seed::distro::mock::MockDistro;
///
/// let distro = MockDistro::new().with_bring_up_result(false);
/// assert!(distro.applied().is_empty());
/// ```
#[derive(Debug)]
pub struct MockDistro {
    applied: Mutex<Vec<(Value, bool)>>,
    apply_error: Option<String>,
    activator: MockActivator,
}

impl MockDistro {
    pub fn new() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            apply_error: None,
            activator: MockActivator {
                succeed: true,
                brought_up: Mutex::new(Vec::new()),
            },
        }
    }

    /// What `bring_up_interface` reports
    pub fn with_bring_up_result(mut self, succeed: bool) -> Self {
        self.activator.succeed = succeed;
        self
    }

    /// Make `apply_network_config` fail
    pub fn with_apply_error(mut self, error: &str) -> Self {
        self.apply_error = Some(error.to_string());
        self
    }

    /// Configs passed to `apply_network_config`, with their `bring_up` flag
    pub fn applied(&self) -> Vec<(Value, bool)> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Interfaces passed to the activator
    pub fn brought_up(&self) -> Vec<String> {
        self.activator
            .brought_up
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

impl Default for MockDistro {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Distro for MockDistro {
    fn name(&self) -> &str {
        "mock"
    }

    async fn apply_network_config(&self, config: &Value, bring_up: bool) -> Result<(), CloudInitError> {
        if let Some(error) = &self.apply_error {
            return Err(CloudInitError::Command(error.clone()));
        }
        if let Ok(mut applied) = self.applied.lock() {
            applied.push((config.clone(), bring_up));
        }
        Ok(())
    }

    fn network_activator(&self) -> &dyn NetworkActivator {
        &self.activator
    }
}
