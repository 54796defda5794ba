//! Local stage - runs before network is available
//!
//! Responsibilities:
//! - Find a datasource that needs only the filesystem
//! - Cache it for the network stage and hotplug
//! - Render its network configuration before networking starts

use tracing::{debug, info};

use super::{StageContext, persist_and_apply};
use crate::CloudInitError;
use crate::datasources::{Datasource, Dependency, discover};
use crate::seed::DsMode;

/// Run the local stage. Returns the datasource found, if any.
pub async fn run(ctx: &StageContext) -> Result<Option<Box<dyn Datasource>>, CloudInitError> {
    info!("Local stage: searching for a local datasource");

    let ds = match discover(&ctx.registry, &ctx.datasources, &[Dependency::Filesystem]).await {
        Ok(ds) => ds,
        Err(CloudInitError::NoDatasource) => {
            info!("Local stage: no local datasource found");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    persist_and_apply(ctx, ds.as_ref(), false).await?;

    if ds.dsmode() != DsMode::Local {
        debug!("Exiting. datasource {} not in local mode.", ds.name());
    }
    info!("Local stage: completed");
    Ok(Some(ds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::datasources::DatasourceContext;
    use crate::distro::mock::MockDistro;
    use crate::seed::fake::{FakeSeedHost, FakeVolume};
    use crate::state::CloudPaths;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stage_context(temp: &TempDir, host: FakeSeedHost, distro: Arc<MockDistro>) -> StageContext {
        let datasources = DatasourceContext {
            config: SystemConfig::default(),
            paths: CloudPaths::with_base(temp.path()),
            host: Arc::new(host),
        };
        StageContext::new(datasources, distro)
    }

    #[tokio::test]
    async fn test_local_stage_caches_nocloud() {
        let temp = TempDir::new().unwrap();
        let host = FakeSeedHost::new().with_volume(
            FakeVolume::new("/dev/vdb", "vfat", "cidata")
                .with_file("meta-data", "instance-id: iid-local\ndsmode: local\n")
                .with_file("user-data", "#cloud-config\n")
                .with_file("network-config", "version: 2\nethernets:\n  eth0:\n    dhcp4: true\n"),
        );
        let distro = Arc::new(MockDistro::new());
        let ctx = stage_context(&temp, host, distro.clone());

        let ds = run(&ctx).await.unwrap().unwrap();
        assert_eq!(ds.name(), "NoCloud");
        assert_eq!(ds.dsmode(), DsMode::Local);

        let cached = ctx.state.load_cache().await.unwrap().unwrap();
        assert_eq!(cached.dsname, "NoCloud");
        assert_eq!(cached.instance_id(), Some("iid-local"));
        assert_eq!(distro.applied().len(), 1);
        assert!(!distro.applied()[0].1);
    }

    #[tokio::test]
    async fn test_local_stage_without_seed() {
        let temp = TempDir::new().unwrap();
        let distro = Arc::new(MockDistro::new());
        let ctx = stage_context(&temp, FakeSeedHost::new(), distro.clone());

        assert!(run(&ctx).await.unwrap().is_none());
        assert!(ctx.state.load_cache().await.unwrap().is_none());
        assert!(distro.applied().is_empty());
    }
}
