//! Reading seeds from a `seedfrom` location
//!
//! A seed location is a base URL: `meta-data`, `user-data`, `vendor-data`
//! and `network-config` are appended to it (or substituted for `%s` when the
//! base contains one). Bare paths are read as `file://` URLs.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use super::{SeedContribution, parse_metadata, parse_yaml};
use crate::CloudInitError;

/// Build the URL of one seed item
pub fn item_url(base: &str, item: &str) -> String {
    if base.contains("%s") {
        base.replace("%s", item)
    } else {
        format!("{}{}", base, item)
    }
}

/// Fetch `meta-data` and `user-data` (required) plus `vendor-data` and
/// `network-config` (optional) from `seedfrom`
pub async fn read_seeded(
    client: &Client,
    seedfrom: &str,
    timeout: Option<Duration>,
) -> Result<SeedContribution, CloudInitError> {
    let base = if seedfrom.starts_with('/') {
        format!("file://{}", seedfrom)
    } else {
        seedfrom.to_string()
    };

    let required = |item: &'static str, content: Option<String>| {
        content.ok_or_else(|| {
            CloudInitError::Datasource(format!("{} not found at {}", item, item_url(&base, item)))
        })
    };

    let meta_data = required(
        "meta-data",
        read_item(client, &item_url(&base, "meta-data"), timeout).await?,
    )?;
    let user_data = required(
        "user-data",
        read_item(client, &item_url(&base, "user-data"), timeout).await?,
    )?;
    let vendor_data = read_item(client, &item_url(&base, "vendor-data"), timeout).await?;
    let network_config = match read_item(client, &item_url(&base, "network-config"), timeout).await? {
        Some(raw) => parse_yaml(&raw)?,
        None => None,
    };

    debug!("Read seed from {}", base);

    Ok(SeedContribution {
        metadata: parse_metadata(&meta_data)?,
        user_data: Some(user_data),
        vendor_data,
        network_config,
    })
}

/// Read a single item. `None` when it does not exist.
async fn read_item(
    client: &Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<Option<String>, CloudInitError> {
    if let Some(path) = url.strip_prefix("file://") {
        return match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        };
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let mut request = client.get(url);
        if let Some(t) = timeout {
            request = request.timeout(t);
        }
        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CloudInitError::Http(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        return Ok(Some(response.text().await?));
    }

    Err(CloudInitError::InvalidData(format!(
        "unsupported seed transport: {}",
        url
    )))
}
