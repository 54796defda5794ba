//! Seed resolution
//!
//! Sources are consulted in a fixed order and layered onto one accumulator:
//!
//! 1. DMI system serial number (`ds=nocloud;...` encoded)
//! 2. Kernel command line
//! 3. The first seed directory holding both `user-data` and `meta-data`
//! 4. `seedfrom` from the datasource config
//! 5. `meta-data`/`user-data` given directly in the datasource config
//! 6. The first labeled volume that mounts and holds a valid seed
//! 7. The `seedfrom` location, layered on top of everything above
//!
//! Metadata keys from later sources replace earlier ones. The mode is the
//! first explicit `dsmode`, else implied by the `seedfrom` scheme, else by the
//! command-line ds id, else the datasource default.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cmdline::{CmdlineSeed, load_cmdline_data};
use super::dmi::sub_dmi_vars;
use super::{
    DeviceFilter, DsMode, OPTIONAL_SEED_FILES, REQUIRED_SEED_FILES, SeedBundle, SeedContribution,
    SeedHost, metadata_from_value, read_seed_files,
};
use crate::CloudInitError;
use crate::config::NoCloudSettings;
use crate::network::eni::convert_eni_data;

/// Seed locations usable before networking is up
pub const LOCAL_SEED_STARTS: &[&str] = &["/", "file://"];

/// Seed locations that need networking
pub const NETWORK_SEED_STARTS: &[&str] = &["http://", "https://", "ftp://", "ftps://"];

/// Instance id used when no source names one
pub const DEFAULT_INSTANCE_ID: &str = "nocloud";

/// Per-datasource resolution rules
#[derive(Debug, Clone)]
pub struct SeedPolicy {
    /// Datasource name, for logging
    pub dsname: &'static str,
    /// Local seed directories, in priority order
    pub seed_dirs: Vec<PathBuf>,
    /// Accepted `seedfrom` prefixes
    pub supported_seed_starts: &'static [&'static str],
    pub default_dsmode: DsMode,
    /// Network-stage variants warn about unusable seeds instead of deferring
    pub network_stage: bool,
    pub fetch_timeout: Option<Duration>,
}

impl SeedPolicy {
    fn accepts(&self, seedfrom: &str) -> bool {
        self.supported_seed_starts
            .iter()
            .any(|p| seedfrom.starts_with(p))
    }

    fn log_unusable_seedfrom(&self, seedfrom: &str) {
        if self.network_stage {
            warn!(
                "{} only uses seeds starting with {:?} - {} is not valid.",
                self.dsname, self.supported_seed_starts, seedfrom
            );
        } else {
            info!(
                "{} only uses seeds starting with {:?} - will try to use {} in the network stage.",
                self.dsname, self.supported_seed_starts, seedfrom
            );
        }
    }
}

/// Outcome of a resolution pass
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(ResolvedSeed),
    /// This datasource does not apply
    NotFound,
}

/// A finalized seed
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSeed {
    pub bundle: SeedBundle,
    pub dsmode: DsMode,
    /// Contributing sources, in the order they were merged
    pub provenance: Vec<String>,
}

impl ResolvedSeed {
    /// Provenance tag, e.g. `cmdline,/dev/sr0`
    pub fn seed(&self) -> String {
        self.provenance.join(",")
    }
}

/// Merge state threaded through the resolution steps
#[derive(Debug, Default)]
struct Accumulator {
    bundle: SeedBundle,
    found: Vec<String>,
    explicit_dsmode: Option<DsMode>,
    ds_id_dsmode: Option<DsMode>,
}

impl Accumulator {
    fn absorb(self, tag: impl Into<String>, contribution: SeedContribution) -> Result<Self, CloudInitError> {
        let explicit = explicit_dsmode(&contribution.metadata)?;
        let mut found = self.found;
        found.push(tag.into());

        Ok(Self {
            bundle: self.bundle.merged(contribution),
            found,
            explicit_dsmode: self.explicit_dsmode.or(explicit),
            ds_id_dsmode: self.ds_id_dsmode,
        })
    }

    fn absorb_cmdline(self, tag: &str, seed: CmdlineSeed) -> Result<Self, CloudInitError> {
        let mut next = self.absorb(tag, SeedContribution::metadata(seed.metadata))?;
        next.ds_id_dsmode = next.ds_id_dsmode.or(Some(seed.ds_dsmode));
        Ok(next)
    }

    fn finish(self, default_dsmode: DsMode, dsname: &str) -> Resolution {
        let seedfrom_dsmode = self.bundle.get_str("seedfrom").and_then(DsMode::from_seedfrom);
        let dsmode = self
            .explicit_dsmode
            .or(seedfrom_dsmode)
            .or(self.ds_id_dsmode)
            .unwrap_or(default_dsmode);

        let mut defaults = Mapping::new();
        defaults.insert("instance-id".into(), DEFAULT_INSTANCE_ID.into());
        defaults.insert("dsmode".into(), default_dsmode.as_str().into());

        let mut bundle = self.bundle.with_defaults(defaults);
        bundle
            .metadata
            .insert("dsmode".into(), dsmode.as_str().into());

        if dsmode == DsMode::Disabled {
            debug!("{}: not claiming datasource, dsmode={}", dsname, dsmode);
            return Resolution::NotFound;
        }

        if bundle.network_config.is_none()
            && let Some(eni) = bundle.get_str("network-interfaces")
        {
            warn!("{}: ENI network-interfaces metadata is deprecated, use network-config", dsname);
            bundle.network_config = Some(convert_eni_data(eni));
        }

        Resolution::Found(ResolvedSeed {
            bundle,
            dsmode,
            provenance: self.found,
        })
    }
}

/// Explicit, non-null `dsmode` in a metadata mapping
fn explicit_dsmode(metadata: &Mapping) -> Result<Option<DsMode>, CloudInitError> {
    match metadata.get("dsmode") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DsMode::parse(s)
            .map(Some)
            .ok_or_else(|| CloudInitError::Config(format!("invalid dsmode: {}", s))),
        Some(other) => Err(CloudInitError::Config(format!("invalid dsmode: {:?}", other))),
    }
}

/// Devices that may carry a seed volume labeled `label`.
///
/// vfat or iso9660 filesystems whose label matches in upper or lower case,
/// or whose FAT boot label matches, newest-named first.
pub async fn find_seed_devices(host: &dyn SeedHost, label: &str) -> Result<Vec<String>, CloudInitError> {
    let mut by_type = BTreeSet::new();
    for fs_type in ["vfat", "iso9660"] {
        by_type.extend(host.find_devices_by(&DeviceFilter::Type(fs_type.into())).await?);
    }

    let mut by_label = BTreeSet::new();
    for filter in [
        DeviceFilter::Label(label.to_uppercase()),
        DeviceFilter::Label(label.to_lowercase()),
        DeviceFilter::FatbootLabel(label.to_string()),
    ] {
        by_label.extend(host.find_devices_by(&filter).await?);
    }

    let mut devices: Vec<String> = by_type.intersection(&by_label).cloned().collect();
    devices.reverse();
    Ok(devices)
}

/// Resolves one seed bundle for a NoCloud-style datasource
pub struct SeedResolver<'a> {
    host: &'a dyn SeedHost,
    settings: &'a NoCloudSettings,
    policy: &'a SeedPolicy,
}

impl<'a> SeedResolver<'a> {
    pub fn new(host: &'a dyn SeedHost, settings: &'a NoCloudSettings, policy: &'a SeedPolicy) -> Self {
        Self {
            host,
            settings,
            policy,
        }
    }

    /// Run all resolution steps.
    ///
    /// DMI or command-line read failures and malformed seed-directory data
    /// abort the pass with an error. Unusable volumes are skipped.
    pub async fn resolve(&self) -> Result<Resolution, CloudInitError> {
        let mut acc = Accumulator::default();

        if let Some(serial) = self.host.read_dmi("system-serial-number").await?
            && let Some(seed) = load_cmdline_data(&serial)
        {
            acc = acc.absorb_cmdline("dmi", seed)?;
        }

        let cmdline = self.host.kernel_cmdline().await?;
        if let Some(seed) = load_cmdline_data(&cmdline) {
            acc = acc.absorb_cmdline("cmdline", seed)?;
        }

        for dir in &self.policy.seed_dirs {
            if let Some(files) = read_seed_files(dir, REQUIRED_SEED_FILES, OPTIONAL_SEED_FILES).await? {
                debug!("Using seeded data from {}", dir.display());
                acc = acc.absorb(dir.display().to_string(), SeedContribution::from_files(&files)?)?;
                break;
            }
        }

        if let Some(seedfrom) = &self.settings.seedfrom {
            let mut md = Mapping::new();
            md.insert("seedfrom".into(), seedfrom.as_str().into());
            acc = acc.absorb("ds_config_seedfrom", SeedContribution::metadata(md))?;
        }

        if let (Some(meta_data), Some(user_data)) = (&self.settings.meta_data, &self.settings.user_data) {
            let contribution = SeedContribution {
                metadata: metadata_from_value(Some(meta_data.clone()))?,
                user_data: Some(user_data.clone()),
                vendor_data: self.settings.vendor_data.clone(),
                network_config: self.settings.network_config.clone(),
            };
            acc = acc.absorb("ds_config", contribution)?;
        }

        if let Some(label) = &self.settings.fs_label {
            acc = self.probe_volumes(acc, label).await?;
        }

        if acc.found.is_empty() {
            debug!("{}: no seed sources found", self.policy.dsname);
            return Ok(Resolution::NotFound);
        }

        if let Some(seedfrom) = acc.bundle.get_str("seedfrom").map(str::to_string) {
            if !self.policy.accepts(&seedfrom) {
                self.policy.log_unusable_seedfrom(&seedfrom);
                return Ok(Resolution::NotFound);
            }

            let url = sub_dmi_vars(self.host, &seedfrom).await;
            let seeded = self.host.read_seeded(&url, self.policy.fetch_timeout).await?;
            debug!("Using seeded cache data from {}", url);
            acc = acc.absorb(seedfrom, seeded)?;
        }

        Ok(acc.finish(self.policy.default_dsmode, self.policy.dsname))
    }

    async fn probe_volumes(&self, acc: Accumulator, label: &str) -> Result<Accumulator, CloudInitError> {
        let devices = match find_seed_devices(self.host, label).await {
            Ok(d) => d,
            Err(e) => {
                warn!("Unable to search for devices labeled {}: {}", label, e);
                return Ok(acc);
            }
        };

        for device in devices {
            debug!("Attempting to use data from {}", device);
            let files = match self
                .host
                .mount_and_read(&device, REQUIRED_SEED_FILES, OPTIONAL_SEED_FILES)
                .await
            {
                Ok(Some(files)) => files,
                Ok(None) => {
                    warn!("device {} with label={} not a valid seed.", device, label);
                    continue;
                }
                Err(e) if e.is_not_applicable() => {
                    debug!("Skipping {}: {}", device, e);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to mount {} when looking for data: {}", device, e);
                    continue;
                }
            };

            let contribution = match SeedContribution::from_files(&files) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Ignoring seed on {}: {}", device, e);
                    continue;
                }
            };
            if let Err(e) = explicit_dsmode(&contribution.metadata) {
                warn!("Ignoring seed on {}: {}", device, e);
                continue;
            }

            debug!("Using data from {}", device);
            return acc.absorb(device, contribution);
        }

        Ok(acc)
    }
}
