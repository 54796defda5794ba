//! Integration tests for network seeds using wiremock

use serde_yaml::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloud_init_seed::config::{NoCloudSettings, SystemConfig};
use cloud_init_seed::datasources::nocloud::{NoCloud, NoCloudVariant};
use cloud_init_seed::datasources::{Datasource, DatasourceContext, Dependency, Registry, discover};
use cloud_init_seed::seed::fake::FakeSeedHost;
use cloud_init_seed::seed::{DsMode, LinuxHost, SeedHost};
use cloud_init_seed::state::CloudPaths;

async fn mount_item(server: &MockServer, item_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(item_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// seedfrom over HTTP
// ============================================================================

#[tokio::test]
async fn test_read_seeded_over_http() {
    let server = MockServer::start().await;
    mount_item(&server, "/seed/meta-data", "instance-id: iid-http\nlocal-hostname: web1\n").await;
    mount_item(&server, "/seed/user-data", "#cloud-config\npackages: [nginx]\n").await;
    // vendor-data and network-config fall through to a 404

    let temp = TempDir::new().unwrap();
    let host = LinuxHost::new(CloudPaths::with_base(temp.path()));
    let seed = host
        .read_seeded(&format!("{}/seed/", server.uri()), None)
        .await
        .unwrap();

    assert_eq!(seed.metadata["instance-id"], Value::from("iid-http"));
    assert_eq!(seed.metadata["local-hostname"], Value::from("web1"));
    assert_eq!(seed.user_data.as_deref(), Some("#cloud-config\npackages: [nginx]\n"));
    assert!(seed.vendor_data.is_none());
    assert!(seed.network_config.is_none());
}

#[tokio::test]
async fn test_read_seeded_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let host = LinuxHost::new(CloudPaths::with_base(temp.path()));
    let result = host.read_seeded(&format!("{}/seed/", server.uri()), None).await;
    assert!(result.is_err());
}

// ============================================================================
// NoCloudNet
// ============================================================================

#[tokio::test]
async fn test_nocloud_net_from_cmdline_url() {
    let server = MockServer::start().await;
    mount_item(&server, "/seed/meta-data", "instance-id: iid-net\n").await;
    mount_item(&server, "/seed/user-data", "#cloud-config\n").await;
    mount_item(
        &server,
        "/seed/network-config",
        "version: 2\nethernets:\n  eth0:\n    dhcp4: true\n",
    )
    .await;

    let temp = TempDir::new().unwrap();
    let seedfrom = format!("{}/seed/", server.uri());
    let cmdline = temp.path().join("cmdline");
    fs::write(&cmdline, format!("console=ttyS0 ds=nocloud-net;s={}\n", seedfrom))
        .await
        .unwrap();
    let dmi = temp.path().join("dmi");
    fs::create_dir_all(&dmi).await.unwrap();

    let paths = CloudPaths::with_base(temp.path().join("cloud"));
    let host = LinuxHost::new(paths.clone()).with_sources(&dmi, &cmdline);
    let settings = NoCloudSettings {
        fs_label: None,
        ..Default::default()
    };

    // The local variant leaves an http seed to the network stage
    let mut local = NoCloud::new(NoCloudVariant::Local, settings.clone(), Arc::new(host), paths.clone());
    assert!(!local.get_data().await.unwrap());

    let host = LinuxHost::new(paths.clone()).with_sources(&dmi, &cmdline);
    let mut net = NoCloud::new(NoCloudVariant::Net, settings, Arc::new(host), paths);
    assert!(net.get_data().await.unwrap());
    assert_eq!(net.name(), "NoCloudNet");
    assert_eq!(net.dsmode(), DsMode::Network);
    assert_eq!(net.instance_id(), Some("iid-net"));
    assert_eq!(net.seed(), format!("cmdline,{}", seedfrom));
    assert!(net.network_config().is_some());
}

// ============================================================================
// SoftLayer
// ============================================================================

#[tokio::test]
async fn test_softlayer_discovered_from_config_url() {
    let server = MockServer::start().await;
    mount_item(&server, "/api/Id.txt", "4242").await;
    mount_item(&server, "/api/Hostname.txt", "sl-host\n").await;
    mount_item(&server, "/api/FullyQualifiedDomainName.txt", "sl-host.example.com\n").await;
    mount_item(&server, "/api/UserMetadata.txt", "#cloud-config\nruncmd: [ls]\n").await;

    let config = SystemConfig::from_yaml(&format!(
        "datasource_list: [SoftLayer]\ndatasource:\n  SoftLayer:\n    metadata_url: {}/api/\n",
        server.uri()
    ))
    .unwrap();
    let temp = TempDir::new().unwrap();
    let ctx = DatasourceContext {
        config,
        paths: CloudPaths::with_base(temp.path()),
        host: Arc::new(FakeSeedHost::new()),
    };

    let ds = discover(
        &Registry::builtin(),
        &ctx,
        &[Dependency::Filesystem, Dependency::Network],
    )
    .await
    .unwrap();

    assert_eq!(ds.name(), "SoftLayer");
    assert_eq!(ds.instance_id(), Some("4242"));
    assert_eq!(ds.bundle().get_str("hostname"), Some("sl-host"));
    assert_eq!(ds.bundle().user_data, "#cloud-config\nruncmd: [ls]\n");
}
