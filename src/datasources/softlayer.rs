//! SoftLayer datasource
//!
//! Fetches metadata from the SoftLayer Resource Metadata REST API. Each
//! item is a plain-text resource under the API base URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_yaml::Mapping;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Datasource, DatasourceContext, Dependency, RegistryEntry};
use crate::CloudInitError;
use crate::seed::{DsMode, SeedBundle};
use crate::state::CachedDatasource;

pub const ENTRY: RegistryEntry = RegistryEntry {
    name: "SoftLayer",
    list_name: "SoftLayer",
    dependencies: &[Dependency::Filesystem, Dependency::Network],
    constructor: new_softlayer,
};

fn new_softlayer(ctx: &DatasourceContext) -> Box<dyn Datasource> {
    Box::new(SoftLayer::with_base_url(&ctx.config.datasource.softlayer.metadata_url))
}

/// Metadata items and the keys they populate
const METADATA_ITEMS: &[(&str, &str)] = &[
    ("FullyQualifiedDomainName.txt", "public_fqdn"),
    ("Hostname.txt", "hostname"),
    ("Id.txt", "instance-id"),
];

const USER_DATA_ITEM: &str = "UserMetadata.txt";

/// Join a base URL and an item with exactly one `/`
pub fn combine_url(base: &str, item: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), item.trim_start_matches('/'))
}

/// SoftLayer datasource
pub struct SoftLayer {
    client: Client,
    base_url: String,
    bundle: SeedBundle,
}

impl SoftLayer {
    /// Create with a custom base URL (useful for testing)
    pub fn with_base_url(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: base_url.to_string(),
            bundle: SeedBundle::default(),
        }
    }

    /// Fetch one item. A non-200 response means the item is absent.
    async fn fetch_metadata_item(&self, item: &str) -> Result<Option<String>, CloudInitError> {
        let url = combine_url(&self.base_url, item);
        let response = self.client.get(&url).send().await?;

        if response.status() != StatusCode::OK {
            debug!("{} returned {}", url, response.status());
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }

    async fn fetch_all(&self) -> Result<SeedBundle, CloudInitError> {
        let mut metadata = Mapping::new();
        for (item, key) in METADATA_ITEMS {
            if let Some(value) = self.fetch_metadata_item(item).await? {
                metadata.insert((*key).into(), value.trim().into());
            }
        }
        let user_data = self.fetch_metadata_item(USER_DATA_ITEM).await?.unwrap_or_default();

        Ok(SeedBundle {
            metadata,
            user_data,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Datasource for SoftLayer {
    fn name(&self) -> &'static str {
        "SoftLayer"
    }

    async fn get_data(&mut self) -> Result<bool, CloudInitError> {
        match self.fetch_all().await {
            Ok(bundle) => {
                self.bundle = bundle;
                Ok(true)
            }
            Err(e) => {
                debug!("SoftLayer metadata API unavailable: {}", e);
                Ok(false)
            }
        }
    }

    fn bundle(&self) -> &SeedBundle {
        &self.bundle
    }

    fn dsmode(&self) -> DsMode {
        DsMode::Network
    }

    fn seed(&self) -> String {
        self.base_url.clone()
    }

    fn restore(&mut self, cached: &CachedDatasource) {
        self.bundle = cached.bundle.clone();
    }
}
