//! Host probes used during seed discovery
//!
//! [`SeedHost`] is the boundary between the resolver and the machine it
//! runs on: DMI, the kernel command line, block device search, scoped
//! volume mounts, remote seed fetches and VMware guestinfo.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{SeedContribution, SeedFiles, dmi, fetch, read_seed_files};
use crate::CloudInitError;
use crate::state::CloudPaths;

/// blkid search criteria
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Filesystem type, e.g. `vfat`
    Type(String),
    /// Filesystem label (exact match)
    Label(String),
    /// FAT boot sector label
    FatbootLabel(String),
}

impl DeviceFilter {
    /// Criteria string understood by `blkid -t`
    pub fn criteria(&self) -> String {
        match self {
            Self::Type(t) => format!("TYPE={}", t),
            Self::Label(l) => format!("LABEL={}", l),
            Self::FatbootLabel(l) => format!("LABEL_FATBOOT={}", l),
        }
    }
}

/// Machine access needed by seed discovery
#[async_trait]
pub trait SeedHost: Send + Sync {
    /// Read a DMI value by dmidecode key. `None` when absent.
    async fn read_dmi(&self, key: &str) -> Result<Option<String>, CloudInitError>;

    /// The kernel command line
    async fn kernel_cmdline(&self) -> Result<String, CloudInitError>;

    /// Block devices matching a filter
    async fn find_devices_by(&self, filter: &DeviceFilter) -> Result<Vec<String>, CloudInitError>;

    /// Mount `device`, read seed files, and always unmount again.
    ///
    /// Returns `None` when a required file is missing.
    async fn mount_and_read(
        &self,
        device: &str,
        required: &[&str],
        optional: &[&str],
    ) -> Result<Option<SeedFiles>, CloudInitError>;

    /// Fetch a seed from a `seedfrom` location
    async fn read_seeded(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<SeedContribution, CloudInitError>;

    /// VMware guestinfo value (`guestinfo.<key>`). `None` when unset.
    async fn guestinfo(&self, key: &str) -> Result<Option<String>, CloudInitError>;
}

/// [`SeedHost`] backed by sysfs, procfs and system utilities
pub struct LinuxHost {
    paths: CloudPaths,
    client: Client,
    dmi_dir: PathBuf,
    cmdline_path: PathBuf,
}

impl LinuxHost {
    pub fn new(paths: CloudPaths) -> Self {
        Self {
            paths,
            client: Client::new(),
            dmi_dir: PathBuf::from(dmi::SYS_DMI_DIR),
            cmdline_path: PathBuf::from("/proc/cmdline"),
        }
    }

    /// Use alternative DMI and command line sources (useful for testing)
    pub fn with_sources(mut self, dmi_dir: impl AsRef<Path>, cmdline: impl AsRef<Path>) -> Self {
        self.dmi_dir = dmi_dir.as_ref().to_path_buf();
        self.cmdline_path = cmdline.as_ref().to_path_buf();
        self
    }

    /// Existing mount point of `device`, from /proc/mounts
    async fn find_mountpoint(device: &str) -> Option<PathBuf> {
        let mounts = fs::read_to_string("/proc/mounts").await.ok()?;
        mounts.lines().find_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            (source == device).then(|| PathBuf::from(target))
        })
    }

    async fn run(program: &str, args: &[&str]) -> Result<std::process::Output, CloudInitError> {
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CloudInitError::Command(format!("{}: {}", program, e)))
    }
}

#[async_trait]
impl SeedHost for LinuxHost {
    async fn read_dmi(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        let Some(attr) = dmi::sysfs_attribute(key) else {
            debug!("Unknown DMI key: {}", key);
            return Ok(None);
        };

        match fs::read(self.dmi_dir.join(attr)).await {
            Ok(raw) => {
                let value = String::from_utf8_lossy(&raw).trim().to_string();
                Ok((!value.is_empty()).then_some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn kernel_cmdline(&self) -> Result<String, CloudInitError> {
        match fs::read_to_string(&self.cmdline_path).await {
            Ok(c) => Ok(c.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_devices_by(&self, filter: &DeviceFilter) -> Result<Vec<String>, CloudInitError> {
        let criteria = filter.criteria();
        let output = Self::run("blkid", &["-c", "/dev/null", "-t", criteria.as_str(), "-odevice"]).await?;

        // blkid exits 2 when nothing matches
        match output.status.code() {
            Some(0) => {}
            Some(2) => return Ok(Vec::new()),
            _ => {
                return Err(CloudInitError::Command(format!(
                    "blkid -t {} failed: {}",
                    criteria,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn mount_and_read(
        &self,
        device: &str,
        required: &[&str],
        optional: &[&str],
    ) -> Result<Option<SeedFiles>, CloudInitError> {
        if let Some(existing) = Self::find_mountpoint(device).await {
            debug!("{} already mounted at {}", device, existing.display());
            return read_seed_files(&existing, required, optional).await;
        }

        let name = device.trim_start_matches('/').replace('/', "_");
        let mountpoint = self.paths.mount_tmp_dir().join(name);
        fs::create_dir_all(&mountpoint).await?;
        let target = mountpoint.to_string_lossy().to_string();

        let output = Self::run("mount", &["-o", "ro", device, target.as_str()]).await?;
        if !output.status.success() {
            fs::remove_dir(&mountpoint).await.ok();
            return Err(CloudInitError::mount(
                device,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        let result = read_seed_files(&mountpoint, required, optional).await;

        match Self::run("umount", &[target.as_str()]).await {
            Ok(o) if o.status.success() => {
                fs::remove_dir(&mountpoint).await.ok();
            }
            Ok(o) => warn!(
                "Failed to unmount {}: {}",
                target,
                String::from_utf8_lossy(&o.stderr).trim()
            ),
            Err(e) => warn!("Failed to unmount {}: {}", target, e),
        }

        result
    }

    async fn read_seeded(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<SeedContribution, CloudInitError> {
        fetch::read_seeded(&self.client, url, timeout).await
    }

    async fn guestinfo(&self, key: &str) -> Result<Option<String>, CloudInitError> {
        let arg = format!("info-get guestinfo.{}", key);
        let output = match Command::new("vmtoolsd").args(["--cmd", arg.as_str()]).output().await {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CloudInitError::NotApplicable("vmtoolsd not installed".into()));
            }
            Err(e) => return Err(CloudInitError::Command(format!("vmtoolsd: {}", e))),
        };

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() || value.is_empty() {
            return Ok(None);
        }
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_filter_criteria() {
        assert_eq!(DeviceFilter::Type("vfat".into()).criteria(), "TYPE=vfat");
        assert_eq!(DeviceFilter::Label("CIDATA".into()).criteria(), "LABEL=CIDATA");
        assert_eq!(
            DeviceFilter::FatbootLabel("cidata".into()).criteria(),
            "LABEL_FATBOOT=cidata"
        );
    }

    #[tokio::test]
    async fn test_read_dmi_and_cmdline_from_files() {
        let temp = TempDir::new().unwrap();
        let dmi_dir = temp.path().join("dmi");
        fs::create_dir_all(&dmi_dir).await.unwrap();
        fs::write(dmi_dir.join("product_serial"), "ds=nocloud;i=abc\n")
            .await
            .unwrap();
        let cmdline = temp.path().join("cmdline");
        fs::write(&cmdline, "ro quiet ds=nocloud\n").await.unwrap();

        let host = LinuxHost::new(CloudPaths::with_base(temp.path())).with_sources(&dmi_dir, &cmdline);

        assert_eq!(
            host.read_dmi("system-serial-number").await.unwrap(),
            Some("ds=nocloud;i=abc".to_string())
        );
        assert_eq!(host.read_dmi("system-uuid").await.unwrap(), None);
        assert_eq!(host.kernel_cmdline().await.unwrap(), "ro quiet ds=nocloud");
    }
}
