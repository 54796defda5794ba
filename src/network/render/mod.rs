//! Network configuration renderers
//!
//! Converts NetworkConfig to system-specific configuration files.

pub mod networkd;

use crate::CloudInitError;
use crate::network::NetworkConfig;
use std::path::Path;
use tracing::{debug, info};

/// Trait for network configuration renderers
pub trait Renderer {
    /// Render network configuration to files
    fn render(&self, config: &NetworkConfig) -> Result<Vec<RenderedFile>, CloudInitError>;
}

/// A rendered configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFile {
    /// File path (relative to output directory)
    pub path: String,
    pub content: String,
    /// File permissions (octal)
    pub mode: u32,
}

/// Write rendered files under `output_dir`
pub async fn write_rendered(output_dir: &Path, files: &[RenderedFile]) -> Result<(), CloudInitError> {
    for file in files {
        let full_path = output_dir.join(&file.path);
        debug!("Writing network config: {}", full_path.display());

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &file.content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&full_path, std::fs::Permissions::from_mode(file.mode)).await?;
        }
    }

    info!("Wrote {} network configuration files", files.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_rendered() {
        let temp = TempDir::new().unwrap();
        let files = vec![RenderedFile {
            path: "10-eth0.network".to_string(),
            content: "[Match]\nName=eth0\n".to_string(),
            mode: 0o644,
        }];

        write_rendered(temp.path(), &files).await.unwrap();

        let written = tokio::fs::read_to_string(temp.path().join("10-eth0.network"))
            .await
            .unwrap();
        assert_eq!(written, "[Match]\nName=eth0\n");
    }
}
