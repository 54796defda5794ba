//! Persisted record of the event scopes hotplug is enabled for
//!
//! Stored as `{"scopes": [...]}` at `/var/lib/cloud/hotplug.enabled` and
//! rewritten wholesale on every change. Scopes are only ever added.

use crate::CloudInitError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// File mode of the persisted state
pub const HOTPLUG_ENABLED_MODE: u32 = 0o640;

/// Scopes for which hotplug handling has been enabled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugEnabledState {
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl HotplugEnabledState {
    /// Read the state file; a missing or unreadable file means nothing is enabled
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No hotplug state at {}", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!("Ignoring malformed hotplug state {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Add a scope. Returns false when it was already present.
    pub fn enable(&mut self, scope: &str) -> bool {
        if self.contains(scope) {
            return false;
        }
        self.scopes.push(scope.to_string());
        true
    }

    /// Rewrite the state file with mode 0640
    ///
    /// The mode is set before any content is written, so the scopes are
    /// never readable under a wider mode.
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<(), CloudInitError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let json = serde_json::to_string(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CloudInitError::persistent_state(&shown, e))?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(HOTPLUG_ENABLED_MODE);
        let mut file = options
            .open(path)
            .await
            .map_err(|e| CloudInitError::persistent_state(&shown, e))?;

        // An existing file keeps its old mode and a new one is masked by umask
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(HOTPLUG_ENABLED_MODE))
                .await
                .map_err(|e| CloudInitError::persistent_state(&shown, e))?;
        }

        file.write_all(json.as_bytes())
            .await
            .map_err(|e| CloudInitError::persistent_state(&shown, e))?;
        file.flush()
            .await
            .map_err(|e| CloudInitError::persistent_state(&shown, e))?;

        debug!("Wrote hotplug state {:?} to {}", self.scopes, shown);
        Ok(())
    }
}
