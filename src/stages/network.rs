//! Network stage - runs after network is configured
//!
//! Responsibilities:
//! - Reuse the datasource found by the local stage when it defers to the
//!   network stage, otherwise search datasources that need networking
//! - Cache the selected datasource

use tracing::{debug, info};

use super::{StageContext, persist_and_apply};
use crate::CloudInitError;
use crate::datasources::{Datasource, Dependency, discover};
use crate::seed::DsMode;

/// Run the network stage.
///
/// `existing` is the datasource selected by a local stage in this process.
pub async fn run(
    ctx: &StageContext,
    existing: Option<Box<dyn Datasource>>,
) -> Result<Box<dyn Datasource>, CloudInitError> {
    info!("Network stage: fetching metadata");

    let ds = match existing {
        Some(ds) => {
            debug!("Using datasource {} from the local stage", ds.name());
            ds
        }
        None => {
            let ds = discover(
                &ctx.registry,
                &ctx.datasources,
                &[Dependency::Filesystem, Dependency::Network],
            )
            .await?;
            persist_and_apply(ctx, ds.as_ref(), true).await?;
            ds
        }
    };

    if ds.dsmode() == DsMode::Local {
        debug!("Datasource {} already applied in local mode", ds.name());
    }
    info!("Network stage: completed with {} [seed={}]", ds.name(), ds.seed());
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::datasources::mock::MockDatasource;
    use crate::datasources::{DatasourceContext, Registry, RegistryEntry};
    use crate::distro::mock::MockDistro;
    use crate::seed::fake::FakeSeedHost;
    use crate::state::CloudPaths;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn stage_context(temp: &TempDir, registry: Registry) -> StageContext {
        let datasources = DatasourceContext {
            config: SystemConfig::default(),
            paths: CloudPaths::with_base(temp.path()),
            host: Arc::new(FakeSeedHost::new()),
        };
        StageContext::new(datasources, Arc::new(MockDistro::new())).with_registry(registry)
    }

    fn new_network_mock(_ctx: &DatasourceContext) -> Box<dyn Datasource> {
        Box::new(MockDatasource::new().with_name("NetMock").with_instance_id("iid-net"))
    }

    #[tokio::test]
    async fn test_discovers_network_datasource() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::new().register(RegistryEntry {
            name: "NetMock",
            list_name: "NetMock",
            dependencies: &[Dependency::Filesystem, Dependency::Network],
            constructor: new_network_mock,
        });
        let ctx = stage_context(&temp, registry);

        let ds = run(&ctx, None).await.unwrap();
        assert_eq!(ds.name(), "NetMock");

        let cached = ctx.state.load_cache().await.unwrap().unwrap();
        assert_eq!(cached.dsname, "NetMock");
        assert_eq!(cached.instance_id(), Some("iid-net"));
    }

    #[tokio::test]
    async fn test_reuses_local_datasource() {
        let temp = TempDir::new().unwrap();
        let ctx = stage_context(&temp, Registry::new());
        let local: Box<dyn Datasource> = Box::new(MockDatasource::new().with_name("NoCloud"));

        let ds = run(&ctx, Some(local)).await.unwrap();
        assert_eq!(ds.name(), "NoCloud");
    }

    #[tokio::test]
    async fn test_no_datasource() {
        let temp = TempDir::new().unwrap();
        let mut ctx = stage_context(&temp, Registry::builtin());
        ctx.datasources.config.datasource_list = Some(vec!["NoCloud".to_string(), "ExtraConfig".to_string()]);

        let err = run(&ctx, None).await.err().unwrap();
        assert!(matches!(err, CloudInitError::NoDatasource));
    }
}
