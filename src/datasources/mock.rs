//! Mock datasource for testing
//!
//! Provides a configurable mock datasource that can be used in unit tests.

use async_trait::async_trait;
use serde_yaml::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Datasource, HotplugRetrySettings};
use crate::event::{EventType, UpdateEvents, network_events};
use crate::seed::{DsMode, SeedBundle};
use crate::state::CachedDatasource;
use crate::CloudInitError;

/// Mock datasource for testing
///
/// # Example
/// ```
/// use cloud_init_seed::datasources::mock::MockDatasource;
///
/// let mock = MockDatasource::new()
///     .with_instance_id("test-123")
///     .with_hotplug_support();
/// ```
pub struct MockDatasource {
    name: &'static str,
    available: bool,
    get_data_error: Option<String>,
    bundle: SeedBundle,
    dsmode: DsMode,
    /// Network configs handed out by successive `get_data` calls
    network_updates: VecDeque<Option<Value>>,
    supported_events: UpdateEvents,
    retry_settings: HotplugRetrySettings,
    skip_detect: bool,
    calls: Arc<AtomicUsize>,
}

impl MockDatasource {
    /// Create a new mock datasource with default values
    pub fn new() -> Self {
        let mut bundle = SeedBundle::default();
        bundle.metadata.insert("instance-id".into(), "iid-mock".into());

        Self {
            name: "Mock",
            available: true,
            get_data_error: None,
            bundle,
            dsmode: DsMode::Network,
            network_updates: VecDeque::new(),
            supported_events: network_events(&[EventType::BootNewInstance]),
            retry_settings: HotplugRetrySettings::default(),
            skip_detect: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set whether `get_data` claims the instance
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Configure `get_data` to fail
    pub fn with_get_data_error(mut self, error: &str) -> Self {
        self.get_data_error = Some(error.to_string());
        self
    }

    pub fn with_instance_id(mut self, instance_id: &str) -> Self {
        self.bundle
            .metadata
            .insert("instance-id".into(), instance_id.into());
        self
    }

    pub fn with_dsmode(mut self, dsmode: DsMode) -> Self {
        self.dsmode = dsmode;
        self
    }

    /// Network config available before any refresh
    pub fn with_network_config(mut self, config: Value) -> Self {
        self.bundle.network_config = Some(config);
        self
    }

    /// Network configs returned by successive `get_data` calls.
    ///
    /// Once exhausted the last config stays in place.
    pub fn with_network_updates(mut self, updates: Vec<Option<Value>>) -> Self {
        self.network_updates = updates.into();
        self
    }

    /// Advertise hotplug support for the network scope
    pub fn with_hotplug_support(mut self) -> Self {
        self.supported_events = network_events(&[
            EventType::BootNewInstance,
            EventType::Boot,
            EventType::Hotplug,
        ]);
        self
    }

    pub fn with_force_retry(mut self, sleep_period: Duration, sleep_total: Duration) -> Self {
        self.retry_settings = HotplugRetrySettings {
            force_retry: true,
            sleep_period,
            sleep_total,
        };
        self
    }

    pub fn with_skip_hotplug_detect(mut self) -> Self {
        self.skip_detect = true;
        self
    }

    /// Number of `get_data` calls so far
    pub fn get_data_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter, readable after the mock is boxed
    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Default for MockDatasource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datasource for MockDatasource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn get_data(&mut self) -> Result<bool, CloudInitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.get_data_error {
            return Err(CloudInitError::Datasource(error.clone()));
        }
        if let Some(update) = self.network_updates.pop_front() {
            self.bundle.network_config = update;
        }
        Ok(self.available)
    }

    fn bundle(&self) -> &SeedBundle {
        &self.bundle
    }

    fn dsmode(&self) -> DsMode {
        self.dsmode
    }

    fn seed(&self) -> String {
        "mock".to_string()
    }

    fn restore(&mut self, cached: &CachedDatasource) {
        self.bundle = cached.bundle.clone();
        self.dsmode = cached.dsmode;
    }

    fn supported_update_events(&self) -> UpdateEvents {
        self.supported_events.clone()
    }

    fn hotplug_retry_settings(&self) -> HotplugRetrySettings {
        self.retry_settings
    }

    fn skip_hotplug_detect(&self) -> bool {
        self.skip_detect
    }
}
