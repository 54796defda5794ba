//! Error types for cloud-init-seed

use thiserror::Error;

/// Main error type for cloud-init-seed operations
#[derive(Error, Debug)]
pub enum CloudInitError {
    /// A seed source or datasource declined; logged, never shown to the user
    #[error("Not applicable: {0}")]
    NotApplicable(String),

    /// Metadata refresh or device detection failed during hotplug handling
    #[error("Metadata not ready: {0}")]
    TransientMetadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Datasource error: {0}")]
    Datasource(String),

    #[error("No datasource found")]
    NoDatasource,

    #[error("Failed to mount {device}: {message}")]
    Mount { device: String, message: String },

    #[error("Failed to persist {path}: {message}")]
    PersistentState { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Command execution failed: {0}")]
    Command(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl CloudInitError {
    /// Create a mount error
    pub fn mount(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mount {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a persistent state error
    pub fn persistent_state(path: impl Into<String>, message: impl ToString) -> Self {
        Self::PersistentState {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error only means "this source does not apply here"
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Self::NotApplicable(_) | Self::Mount { .. })
    }
}

impl From<reqwest::Error> for CloudInitError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_applicable_classification() {
        assert!(CloudInitError::NotApplicable("label missing".into()).is_not_applicable());
        assert!(CloudInitError::mount("/dev/sr0", "no medium").is_not_applicable());
        assert!(!CloudInitError::Config("bad yaml".into()).is_not_applicable());
    }

    #[test]
    fn test_error_display() {
        let err = CloudInitError::persistent_state("/var/lib/cloud/hotplug.enabled", "read-only");
        assert_eq!(
            err.to_string(),
            "Failed to persist /var/lib/cloud/hotplug.enabled: read-only"
        );
    }
}
