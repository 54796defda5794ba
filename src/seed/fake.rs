//! In-memory seed host for testing
//!
//! Provides a configurable [`SeedHost`] that never touches the machine.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{DeviceFilter, SeedContribution, SeedFiles, SeedHost};
use crate::CloudInitError;

/// A block device known to the fake host
#[derive(Debug, Clone, Default)]
pub struct FakeVolume {
    pub device: String,
    pub fs_type: String,
    pub label: String,
    pub fatboot_label: Option<String>,
    pub files: SeedFiles,
    pub mount_fails: bool,
}

impl FakeVolume {
    pub fn new(device: &str, fs_type: &str, label: &str) -> Self {
        Self {
            device: device.to_string(),
            fs_type: fs_type.to_string(),
            label: label.to_string(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_fatboot_label(mut self, label: &str) -> Self {
        self.fatboot_label = Some(label.to_string());
        self
    }

    pub fn failing_mount(mut self) -> Self {
        self.mount_fails = true;
        self
    }
}

/// Fake [`SeedHost`]
///
/// # Example
/// ```
/// use cloud_init_seed::seed::fake::{FakeSeedHost, FakeVolume};
///
/// let host = FakeSeedHost::new()
///     .with_cmdline("ro ds=nocloud;h=myhost")
///     .with_volume(
///         FakeVolume::new("/dev/sr0", "iso9660", "CIDATA")
///             .with_file("meta-data", "instance-id: abc\n")
///             .with_file("user-data", "#cloud-config\n"),
///     );
/// ```
#[derive(Default)]
pub struct FakeSeedHost {
    dmi: HashMap<String, String>,
    dmi_error: Option<String>,
    cmdline: String,
    volumes: Vec<FakeVolume>,
    seeds: HashMap<String, SeedContribution>,
    guestinfo: HashMap<String, String>,
    mounts: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeSeedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dmi(mut self, key: &str, value: &str) -> Self {
        self.dmi.insert(key.to_string(), value.to_string());
        self
    }

    /// Make every DMI read fail
    pub fn with_dmi_error(mut self, error: &str) -> Self {
        self.dmi_error = Some(error.to_string());
        self
    }

    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = cmdline.to_string();
        self
    }

    pub fn with_volume(mut self, volume: FakeVolume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// Seed returned by `read_seeded` for exactly this URL
    pub fn with_seed(mut self, url: &str, seed: SeedContribution) -> Self {
        self.seeds.insert(url.to_string(), seed);
        self
    }

    pub fn with_guestinfo(mut self, key: &str, value: &str) -> Self {
        self.guestinfo.insert(key.to_string(), value.to_string());
        self
    }

    /// Devices passed to `mount_and_read`, in call order
    pub fn mounted(&self) -> Vec<String> {
        self.mounts.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// URLs passed to `read_seeded`, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SeedHost for FakeSeedHost {
    async fn read_dmi(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        if let Some(error) = &self.dmi_error {
            return Err(CloudInitError::InvalidData(error.clone()));
        }
        Ok(self.dmi.get(key).cloned())
    }

    async fn kernel_cmdline(&self) -> Result<String, CloudInitError> {
        Ok(self.cmdline.clone())
    }

    async fn find_devices_by(&self, filter: &DeviceFilter) -> Result<Vec<String>, CloudInitError> {
        Ok(self
            .volumes
            .iter()
            .filter(|v| match filter {
                DeviceFilter::Type(t) => &v.fs_type == t,
                DeviceFilter::Label(l) => &v.label == l,
                DeviceFilter::FatbootLabel(l) => v.fatboot_label.as_ref() == Some(l),
            })
            .map(|v| v.device.clone())
            .collect())
    }

    async fn mount_and_read(
        &self,
        device: &str,
        required: &[&str],
        optional: &[&str],
    ) -> Result<Option<SeedFiles>, CloudInitError> {
        if let Ok(mut mounts) = self.mounts.lock() {
            mounts.push(device.to_string());
        }

        let volume = self
            .volumes
            .iter()
            .find(|v| v.device == device)
            .ok_or_else(|| CloudInitError::mount(device, "no such device"))?;
        if volume.mount_fails {
            return Err(CloudInitError::mount(device, "wrong fs type, bad superblock"));
        }

        let mut files = SeedFiles::new();
        for name in required {
            match volume.files.get(*name) {
                Some(content) => {
                    files.insert(name.to_string(), content.clone());
                }
                None => return Ok(None),
            }
        }
        for name in optional {
            if let Some(content) = volume.files.get(*name) {
                files.insert(name.to_string(), content.clone());
            }
        }
        Ok(Some(files))
    }

    async fn read_seeded(
        &self,
        url: &str,
        _timeout: Option<Duration>,
    ) -> Result<SeedContribution, CloudInitError> {
        if let Ok(mut fetches) = self.fetches.lock() {
            fetches.push(url.to_string());
        }
        self.seeds
            .get(url)
            .cloned()
            .ok_or_else(|| CloudInitError::Http(format!("GET {}meta-data returned 404", url)))
    }

    async fn guestinfo(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        Ok(self.guestinfo.get(key).cloned())
    }
}
