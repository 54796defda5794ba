//! System config loader
//!
//! Loads and merges configuration from the standard locations.

use super::{SystemConfig, merge};
use crate::{CloudInitError, state::CloudPaths};
use serde_yaml::Value;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Load and merge cloud.cfg and cloud.cfg.d/*.cfg
pub async fn load_system_config(paths: &CloudPaths) -> Result<SystemConfig, CloudInitError> {
    let mut documents = Vec::new();

    if let Some(doc) = load_config_file(paths.main_config()).await? {
        debug!("Loaded base config from {}", paths.main_config().display());
        documents.push(doc);
    }

    documents.extend(load_dropin_configs(paths.config_d()).await?);

    let merged = merge::merge_all_values(&documents);
    SystemConfig::from_value(merged)
        .map_err(|e| CloudInitError::Config(format!("invalid system configuration: {}", e)))
}

/// Load one config document. Unparseable files are skipped.
async fn load_config_file(path: impl AsRef<Path>) -> Result<Option<Value>, CloudInitError> {
    let path = path.as_ref();

    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_yaml::from_str::<Value>(&content) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Load all drop-in configs from a directory (sorted alphabetically)
async fn load_dropin_configs(dir: impl AsRef<Path>) -> Result<Vec<Value>, CloudInitError> {
    let dir = dir.as_ref();

    let mut read_dir = match fs::read_dir(dir).await {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "cfg") {
            entries.push(path);
        }
    }
    entries.sort();

    let mut documents = Vec::new();
    for path in entries {
        if let Some(doc) = load_config_file(&path).await? {
            debug!("Loaded drop-in config from {}", path.display());
            documents.push(doc);
        }
    }

    info!("Loaded {} drop-in configs", documents.len());
    Ok(documents)
}
