//! Hotplug coordinator
//!
//! Each attempt walks the states
//! `Init -> MetadataRefreshed -> DeviceVerified -> ConfigApplied -> Recorded`.
//! Any failure ends the attempt in `Failed`; [`RetryState`] decides whether
//! another attempt follows.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::net::SYS_ROOT;
use super::retry::{Clock, RetryState, Step, TokioClock};
use super::{Action, HookInstaller, HotplugEvent, Subsystem, UdevHookInstaller};
use crate::CloudInitError;
use crate::config::SystemConfig;
use crate::datasources::{Datasource, update_event_enabled};
use crate::distro::Distro;
use crate::distro::networkd::NetworkdDistro;
use crate::event::EventType;
use crate::state::{CloudPaths, HotplugEnabledState, InstanceState};

/// Durably records a successfully applied event
#[async_trait]
pub trait SuccessRecorder: Send + Sync {
    async fn record(&self, datasource: &dyn Datasource) -> Result<(), CloudInitError>;
}

#[async_trait]
impl SuccessRecorder for InstanceState {
    async fn record(&self, datasource: &dyn Datasource) -> Result<(), CloudInitError> {
        self.write_cache(&datasource.cache_entry()).await
    }
}

/// Progress of one attempt
#[derive(Debug)]
pub enum HotplugState {
    Init,
    MetadataRefreshed,
    DeviceVerified,
    ConfigApplied,
    Recorded,
    Failed(CloudInitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Hotplug is unsupported or not enabled; nothing was done
    Ignored,
    /// Total attempts made across all rounds
    Applied { attempts: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    /// The datasource does not support hotplug for the scope
    Unsupported,
    AlreadyEnabled,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Enabled,
    Disabled,
    /// No datasource could be determined
    UnknownDatasource,
}

/// Handles, enables and queries hotplug for one host
pub struct HotplugCoordinator {
    config: SystemConfig,
    paths: CloudPaths,
    sys_root: PathBuf,
    distro: Arc<dyn Distro>,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn SuccessRecorder>,
    installer: Arc<dyn HookInstaller>,
}

impl HotplugCoordinator {
    /// Coordinator using networkd, the tokio clock, the instance cache and udev
    pub fn new(config: SystemConfig, paths: CloudPaths) -> Self {
        let recorder = Arc::new(InstanceState::with_paths(paths.clone()));
        Self {
            config,
            paths,
            sys_root: PathBuf::from(SYS_ROOT),
            distro: Arc::new(NetworkdDistro::new()),
            clock: Arc::new(TokioClock),
            recorder,
            installer: Arc::new(UdevHookInstaller::new()),
        }
    }

    pub fn with_sys_root(mut self, sys_root: impl AsRef<Path>) -> Self {
        self.sys_root = sys_root.as_ref().to_path_buf();
        self
    }

    pub fn with_distro(mut self, distro: Arc<dyn Distro>) -> Self {
        self.distro = distro;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn SuccessRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn HookInstaller>) -> Self {
        self.installer = installer;
        self
    }

    /// Whether `subsystem` events should be handled for this datasource
    pub async fn is_enabled(&self, datasource: &dyn Datasource, subsystem: Subsystem) -> bool {
        if datasource.get_supported_events(&[EventType::Hotplug]).is_empty() {
            debug!("hotplug not supported for event of type {}", subsystem);
            return false;
        }

        let state = HotplugEnabledState::load(self.paths.hotplug_enabled_file()).await;
        let enabled = update_event_enabled(
            datasource,
            &self.config,
            &state.scopes,
            EventType::Hotplug,
            subsystem.scope(),
        );
        if !enabled {
            debug!("hotplug not enabled for event of type {}", subsystem);
        }
        enabled
    }

    /// Handle one device event
    pub async fn handle(
        &self,
        datasource: &mut dyn Datasource,
        subsystem: Subsystem,
        devpath: &Path,
        action: Action,
    ) -> Result<HandleOutcome, CloudInitError> {
        if !self.is_enabled(datasource, subsystem).await {
            return Ok(HandleOutcome::Ignored);
        }

        let event = HotplugEvent::detect(subsystem, devpath, action, &self.sys_root).await;
        debug!("Created {} event for {} (id={})", subsystem, devpath.display(), event.id());

        let settings = datasource.hotplug_retry_settings();
        if !settings.force_retry {
            let attempts = self.try_hotplug(datasource, &event).await?;
            return Ok(HandleOutcome::Applied { attempts });
        }

        let start = self.clock.now();
        let mut attempts = 0;
        while self.clock.now().duration_since(start) < settings.sleep_total {
            attempts += self.try_hotplug(datasource, &event).await?;
            debug!("Gathering network configuration again due to metadata service lag");
            self.clock.sleep(settings.sleep_period).await;
        }
        Ok(HandleOutcome::Applied { attempts })
    }

    /// Run attempts until one succeeds or the policy is exhausted.
    ///
    /// Returns the number of attempts made.
    pub async fn try_hotplug(
        &self,
        datasource: &mut dyn Datasource,
        event: &HotplugEvent,
    ) -> Result<usize, CloudInitError> {
        let mut retry = RetryState::new();

        loop {
            debug!(
                "subsystem={} update attempt {}/{}",
                event.subsystem,
                retry.attempts() + 1,
                retry.max_attempts()
            );

            let step = match self.attempt(datasource, event).await {
                HotplugState::Recorded => retry.record_success(),
                HotplugState::Failed(e) => retry.record_failure(e),
                other => retry.record_failure(CloudInitError::TransientMetadata(format!(
                    "attempt stopped in state {:?}",
                    other
                ))),
            };

            match step {
                Step::Success => {
                    info!("Applied hotplug event for {}", event.devpath.display());
                    return Ok(retry.attempts());
                }
                Step::Continue { wait, reason } => {
                    debug!("Exception while processing hotplug event. {}", reason);
                    self.clock.sleep(wait).await;
                }
                Step::Exhausted { wait, error } => {
                    debug!("Exception while processing hotplug event. {}", error);
                    if !wait.is_zero() {
                        self.clock.sleep(wait).await;
                    }
                    warn!(
                        "Hotplug event for {} failed after {} attempts",
                        event.devpath.display(),
                        retry.attempts()
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(&self, datasource: &mut dyn Datasource, event: &HotplugEvent) -> HotplugState {
        let mut state = HotplugState::Init;
        loop {
            state = match state {
                HotplugState::Recorded | HotplugState::Failed(_) => return state,
                current => match self.advance(current, datasource, event).await {
                    Ok(next) => next,
                    Err(e) => HotplugState::Failed(e),
                },
            };
        }
    }

    async fn advance(
        &self,
        state: HotplugState,
        datasource: &mut dyn Datasource,
        event: &HotplugEvent,
    ) -> Result<HotplugState, CloudInitError> {
        match state {
            HotplugState::Init => {
                debug!("Refreshing metadata");
                if !datasource.update_metadata_if_supported(&[EventType::Hotplug]).await? {
                    return Err(CloudInitError::TransientMetadata(format!(
                        "Datasource {} not updated for event {}",
                        datasource.name(),
                        EventType::Hotplug
                    )));
                }
                Ok(HotplugState::MetadataRefreshed)
            }
            HotplugState::MetadataRefreshed => {
                if !datasource.skip_hotplug_detect() {
                    debug!("Detecting device in updated metadata");
                    let detected = match &event.device_id {
                        Some(id) => event.subsystem.device_detected(datasource.network_config(), id),
                        None => false,
                    };
                    if detected != event.action.expects_present() {
                        return Err(CloudInitError::TransientMetadata(format!(
                            "Failed to detect {} in updated metadata",
                            event.id()
                        )));
                    }
                }
                Ok(HotplugState::DeviceVerified)
            }
            HotplugState::DeviceVerified => {
                debug!("Applying config change");
                event
                    .subsystem
                    .apply(self.distro.as_ref(), datasource.network_config(), &event.devpath, event.action)
                    .await?;
                Ok(HotplugState::ConfigApplied)
            }
            HotplugState::ConfigApplied => {
                debug!("Updating cache");
                self.recorder.record(datasource).await?;
                Ok(HotplugState::Recorded)
            }
            done => Ok(done),
        }
    }

    /// Enable hotplug for `subsystem` and install the hook once
    pub async fn enable(
        &self,
        datasource: &dyn Datasource,
        subsystem: Subsystem,
    ) -> Result<EnableOutcome, CloudInitError> {
        let scope = subsystem.scope();
        let supported = datasource
            .get_supported_events(&[EventType::Hotplug])
            .get(&scope)
            .is_some_and(|s| s.contains(&EventType::Hotplug));
        if !supported {
            warn!("hotplug not supported for event of {}", subsystem);
            return Ok(EnableOutcome::Unsupported);
        }

        let path = self.paths.hotplug_enabled_file();
        let mut state = HotplugEnabledState::load(&path).await;
        if !state.enable(scope.as_str()) {
            info!("Not installing hotplug for event of type {}. Reason: Already done.", subsystem);
            return Ok(EnableOutcome::AlreadyEnabled);
        }

        state.persist(&path).await?;
        self.installer.install(subsystem).await?;
        info!("Enabled hotplug for subsystem={}", subsystem);
        Ok(EnableOutcome::Enabled)
    }

    /// Report whether hotplug is enabled, without changing anything
    pub async fn query(&self, datasource: Option<&dyn Datasource>, subsystem: Subsystem) -> QueryOutcome {
        match datasource {
            None => QueryOutcome::UnknownDatasource,
            Some(ds) if self.is_enabled(ds, subsystem).await => QueryOutcome::Enabled,
            Some(_) => QueryOutcome::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::mock::MockDatasource;
    use crate::distro::mock::MockDistro;
    use crate::hotplug::ManualClock;
    use serde_yaml::Value;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;

    const MAC: &str = "aa:bb:cc:dd:ee:01";

    #[derive(Default)]
    struct CountingRecorder {
        calls: Mutex<usize>,
    }

    impl CountingRecorder {
        fn calls(&self) -> usize {
            self.calls.lock().map(|c| *c).unwrap_or_default()
        }
    }

    #[async_trait]
    impl SuccessRecorder for CountingRecorder {
        async fn record(&self, _datasource: &dyn Datasource) -> Result<(), CloudInitError> {
            *self.calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingInstaller {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl HookInstaller for CountingInstaller {
        async fn install(&self, _subsystem: Subsystem) -> Result<(), CloudInitError> {
            *self.calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct Fixture {
        temp: TempDir,
        clock: Arc<ManualClock>,
        distro: Arc<MockDistro>,
        recorder: Arc<CountingRecorder>,
        installer: Arc<CountingInstaller>,
        coordinator: HotplugCoordinator,
    }

    async fn fixture(config: SystemConfig) -> Fixture {
        let temp = TempDir::new().unwrap();
        let iface = temp.path().join("sys/class/net/eth1");
        fs::create_dir_all(&iface).await.unwrap();
        fs::write(iface.join("address"), format!("{}\n", MAC)).await.unwrap();

        let clock = Arc::new(ManualClock::new());
        let distro = Arc::new(MockDistro::new());
        let recorder = Arc::new(CountingRecorder::default());
        let installer = Arc::new(CountingInstaller::default());
        let coordinator = HotplugCoordinator::new(config, CloudPaths::with_base(temp.path().join("cloud")))
            .with_sys_root(temp.path().join("sys"))
            .with_clock(clock.clone())
            .with_distro(distro.clone())
            .with_recorder(recorder.clone())
            .with_installer(installer.clone());

        Fixture {
            temp,
            clock,
            distro,
            recorder,
            installer,
            coordinator,
        }
    }

    fn hotplug_enabled_config() -> SystemConfig {
        let mut config = SystemConfig::default();
        config.updates.network.when = vec!["hotplug".to_string()];
        config
    }

    fn network_config(mac: &str) -> Value {
        serde_yaml::from_str(&format!(
            "version: 2\nethernets:\n  eth1:\n    match:\n      macaddress: \"{}\"\n    dhcp4: true\n",
            mac
        ))
        .unwrap()
    }

    fn devpath() -> PathBuf {
        PathBuf::from("/devices/pci0000:00/0000:00:03.0/net/eth1")
    }

    #[tokio::test]
    async fn test_first_attempt_success_records_once() {
        let f = fixture(hotplug_enabled_config()).await;
        let mut ds = MockDatasource::new()
            .with_hotplug_support()
            .with_network_config(network_config("AA:BB:CC:DD:EE:01"));

        let outcome = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Applied { attempts: 1 });
        assert_eq!(f.recorder.calls(), 1);
        assert_eq!(ds.get_data_calls(), 1);
        assert_eq!(f.distro.brought_up(), vec!["eth1".to_string()]);
        assert!(f.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_netplan_shorthand_detected_first_attempt() {
        let f = fixture(hotplug_enabled_config()).await;
        let config: Value = serde_yaml::from_str(&format!(
            "version: 2\nethernets:\n  eth1:\n    match:\n      macaddress: \"{}\"\n    dhcp4: yes\n    addresses:\n      - 10.0.0.5/24:\n          lifetime: 0\n",
            MAC
        ))
        .unwrap();
        let mut ds = MockDatasource::new().with_hotplug_support().with_network_config(config);

        let outcome = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Applied { attempts: 1 });
        assert!(f.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_missing_device_exhausts_attempts() {
        let f = fixture(hotplug_enabled_config()).await;
        let mut ds = MockDatasource::new()
            .with_hotplug_support()
            .with_network_config(network_config("aa:bb:cc:dd:ee:99"));

        let err = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap_err();

        assert!(matches!(err, CloudInitError::TransientMetadata(_)));
        assert!(err.to_string().contains(MAC));
        assert_eq!(ds.get_data_calls(), 5);
        assert_eq!(f.recorder.calls(), 0);
        assert!(f.distro.applied().is_empty());
        assert_eq!(
            f.clock.sleeps(),
            [1, 3, 5, 10, 30].map(Duration::from_secs).to_vec()
        );
    }

    #[tokio::test]
    async fn test_device_appears_after_metadata_lag() {
        let f = fixture(hotplug_enabled_config()).await;
        let mut ds = MockDatasource::new().with_hotplug_support().with_network_updates(vec![
            None,
            Some(network_config("aa:bb:cc:dd:ee:99")),
            Some(network_config(MAC)),
        ]);

        let outcome = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Applied { attempts: 3 });
        assert_eq!(f.clock.sleeps(), [1, 3].map(Duration::from_secs).to_vec());
        assert_eq!(f.recorder.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_retried() {
        let f = fixture(hotplug_enabled_config()).await;
        let mut ds = MockDatasource::new()
            .with_hotplug_support()
            .with_available(false)
            .with_network_config(network_config(MAC));

        let err = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not updated for event hotplug"));
        assert_eq!(ds.get_data_calls(), 5);
        assert_eq!(f.clock.sleeps().last(), Some(&Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_skip_detect_applies_without_match() {
        let f = fixture(hotplug_enabled_config()).await;
        let mut ds = MockDatasource::new()
            .with_hotplug_support()
            .with_skip_hotplug_detect()
            .with_network_config(network_config("aa:bb:cc:dd:ee:99"));

        let outcome = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Applied { attempts: 1 });
        assert_eq!(f.distro.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_not_enabled_is_ignored() {
        let f = fixture(SystemConfig::default()).await;
        let mut ds = MockDatasource::new()
            .with_hotplug_support()
            .with_network_config(network_config(MAC));

        let outcome = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Ignored);
        assert_eq!(ds.get_data_calls(), 0);

        let mut unsupported = MockDatasource::new().with_network_config(network_config(MAC));
        let f = fixture(hotplug_enabled_config()).await;
        let outcome = f
            .coordinator
            .handle(&mut unsupported, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();
        assert_eq!(outcome, HandleOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_force_retry_runs_rounds_for_window() {
        let f = fixture(hotplug_enabled_config()).await;
        let mut ds = MockDatasource::new()
            .with_hotplug_support()
            .with_network_config(network_config(MAC))
            .with_force_retry(Duration::from_secs(20), Duration::from_secs(60));
        let calls = ds.calls_handle();

        let outcome = f
            .coordinator
            .handle(&mut ds, Subsystem::Net, &devpath(), Action::Add)
            .await
            .unwrap();

        assert_eq!(outcome, HandleOutcome::Applied { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.recorder.calls(), 3);
        assert_eq!(f.clock.sleeps(), vec![Duration::from_secs(20); 3]);
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let f = fixture(SystemConfig::default()).await;
        let ds = MockDatasource::new().with_hotplug_support();

        assert_eq!(
            f.coordinator.enable(&ds, Subsystem::Net).await.unwrap(),
            EnableOutcome::Enabled
        );
        assert_eq!(
            f.coordinator.enable(&ds, Subsystem::Net).await.unwrap(),
            EnableOutcome::AlreadyEnabled
        );
        assert_eq!(*f.installer.calls.lock().unwrap(), 1);

        let state = HotplugEnabledState::load(f.temp.path().join("cloud/hotplug.enabled")).await;
        assert_eq!(state.scopes, vec!["network".to_string()]);
        assert_eq!(
            f.coordinator.query(Some(&ds), Subsystem::Net).await,
            QueryOutcome::Enabled
        );
    }

    #[tokio::test]
    async fn test_enable_unsupported() {
        let f = fixture(SystemConfig::default()).await;
        let ds = MockDatasource::new();

        assert_eq!(
            f.coordinator.enable(&ds, Subsystem::Net).await.unwrap(),
            EnableOutcome::Unsupported
        );
        assert_eq!(*f.installer.calls.lock().unwrap(), 0);
        assert!(!f.temp.path().join("cloud/hotplug.enabled").exists());
    }

    #[tokio::test]
    async fn test_query_outcomes() {
        let f = fixture(SystemConfig::default()).await;
        let ds = MockDatasource::new().with_hotplug_support();

        assert_eq!(f.coordinator.query(None, Subsystem::Net).await, QueryOutcome::UnknownDatasource);
        assert_eq!(f.coordinator.query(Some(&ds), Subsystem::Net).await, QueryOutcome::Disabled);
        assert!(!f.temp.path().join("cloud/hotplug.enabled").exists());
    }
}
