//! DMI (SMBIOS) data access
//!
//! Keys use the dmidecode naming (e.g. `system-serial-number`) and are
//! mapped onto `/sys/class/dmi/id/*` attributes.

use super::SeedHost;
use tracing::warn;

/// Default sysfs location of DMI attributes
pub const SYS_DMI_DIR: &str = "/sys/class/dmi/id";

/// dmidecode key to sysfs attribute name
const DMI_KEYS: &[(&str, &str)] = &[
    ("baseboard-asset-tag", "board_asset_tag"),
    ("baseboard-manufacturer", "board_vendor"),
    ("baseboard-product-name", "board_name"),
    ("baseboard-serial-number", "board_serial"),
    ("baseboard-version", "board_version"),
    ("bios-release-date", "bios_date"),
    ("bios-vendor", "bios_vendor"),
    ("bios-version", "bios_version"),
    ("chassis-asset-tag", "chassis_asset_tag"),
    ("chassis-manufacturer", "chassis_vendor"),
    ("chassis-serial-number", "chassis_serial"),
    ("chassis-version", "chassis_version"),
    ("system-manufacturer", "sys_vendor"),
    ("system-product-name", "product_name"),
    ("system-serial-number", "product_serial"),
    ("system-uuid", "product_uuid"),
    ("system-version", "product_version"),
];

/// sysfs attribute for a dmidecode key
pub fn sysfs_attribute(key: &str) -> Option<&'static str> {
    DMI_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, attr)| *attr)
}

/// Replace `__dmi.<key>__` placeholders with DMI values.
///
/// Unknown or unreadable values substitute as the empty string.
pub async fn sub_dmi_vars(host: &dyn SeedHost, src: &str) -> String {
    let mut out = src.to_string();
    for (key, _) in DMI_KEYS {
        let placeholder = format!("__dmi.{}__", key);
        if !out.contains(&placeholder) {
            continue;
        }
        let value = match host.read_dmi(key).await {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read DMI {}: {}", key, e);
                String::new()
            }
        };
        out = out.replace(&placeholder, &value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::fake::FakeSeedHost;

    #[test]
    fn test_sysfs_attribute() {
        assert_eq!(sysfs_attribute("system-serial-number"), Some("product_serial"));
        assert_eq!(sysfs_attribute("chassis-serial-number"), Some("chassis_serial"));
        assert_eq!(sysfs_attribute("processor-family"), None);
    }

    #[tokio::test]
    async fn test_sub_dmi_vars() {
        let host = FakeSeedHost::new()
            .with_dmi("chassis-serial-number", "CHS-42")
            .with_dmi("system-uuid", "ec2a-1b");

        let url = sub_dmi_vars(
            &host,
            "http://seed/__dmi.chassis-serial-number__/__dmi.system-uuid__/",
        )
        .await;
        assert_eq!(url, "http://seed/CHS-42/ec2a-1b/");
    }

    #[tokio::test]
    async fn test_sub_dmi_vars_missing_value() {
        let host = FakeSeedHost::new();
        let url = sub_dmi_vars(&host, "file:///seed/__dmi.baseboard-product-name__/").await;
        assert_eq!(url, "file:///seed//");
    }
}
