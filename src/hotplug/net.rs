//! sysfs lookups for network devices

use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Default sysfs mount point
pub const SYS_ROOT: &str = "/sys";

/// MAC address of `ifname`, read from `<sys_root>/class/net/<ifname>/address`
pub async fn read_mac_address(sys_root: &Path, ifname: &str) -> Option<String> {
    let path = sys_root.join("class/net").join(ifname).join("address");
    match fs::read_to_string(&path).await {
        Ok(mac) => {
            let mac = mac.trim();
            (!mac.is_empty()).then(|| mac.to_string())
        }
        Err(e) => {
            debug!("Unable to read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_mac_address() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("class/net/eth1");
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("address"), "aa:bb:cc:dd:ee:01\n").await.unwrap();

        assert_eq!(
            read_mac_address(temp.path(), "eth1").await.as_deref(),
            Some("aa:bb:cc:dd:ee:01")
        );
        assert_eq!(read_mac_address(temp.path(), "eth2").await, None);
    }
}
