//! systemd-networkd renderer
//!
//! Generates .network and .link files for systemd-networkd.

use super::{RenderedFile, Renderer};
use crate::CloudInitError;
use crate::network::{EthernetConfig, InterfaceCommon, MatchConfig, NetworkConfig};
use std::fmt::{self, Write};

/// systemd-networkd renderer
#[derive(Debug, Default)]
pub struct NetworkdRenderer;

impl NetworkdRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_ethernet(&self, name: &str, config: &EthernetConfig, priority: u32) -> Result<Vec<RenderedFile>, fmt::Error> {
        let mut files = vec![RenderedFile {
            path: format!("{:02}-cloud-init-{}.network", priority, name),
            content: self.render_network_section(name, &config.common, config.match_config.as_ref())?,
            mode: 0o644,
        }];

        if let Some(match_config) = &config.match_config
            && match_config.macaddress.is_some()
            && config.set_name.is_some()
        {
            files.push(RenderedFile {
                path: format!("{:02}-cloud-init-{}.link", priority, name),
                content: self.render_link_section(match_config, config)?,
                mode: 0o644,
            });
        }

        Ok(files)
    }

    fn render_network_section(
        &self,
        name: &str,
        common: &InterfaceCommon,
        match_config: Option<&MatchConfig>,
    ) -> Result<String, fmt::Error> {
        let mut content = String::new();

        writeln!(content, "[Match]")?;
        match match_config {
            Some(MatchConfig {
                macaddress: Some(mac), ..
            }) => writeln!(content, "MACAddress={}", mac)?,
            Some(MatchConfig {
                driver: Some(drv), ..
            }) => writeln!(content, "Driver={}", drv)?,
            Some(MatchConfig { name: Some(n), .. }) => writeln!(content, "Name={}", n)?,
            _ => writeln!(content, "Name={}", name)?,
        }
        writeln!(content)?;

        writeln!(content, "[Network]")?;
        match (common.dhcp4 == Some(true), common.dhcp6 == Some(true)) {
            (true, true) => writeln!(content, "DHCP=yes")?,
            (true, false) => writeln!(content, "DHCP=ipv4")?,
            (false, true) => writeln!(content, "DHCP=ipv6")?,
            (false, false) => {}
        }
        for addr in &common.addresses {
            writeln!(content, "Address={}", addr)?;
        }
        for gw in [&common.gateway4, &common.gateway6].into_iter().flatten() {
            writeln!(content, "Gateway={}", gw)?;
        }
        for dns in &common.nameservers.addresses {
            writeln!(content, "DNS={}", dns)?;
        }
        if !common.nameservers.search.is_empty() {
            writeln!(content, "Domains={}", common.nameservers.search.join(" "))?;
        }
        if let Some(accept_ra) = common.accept_ra {
            writeln!(content, "IPv6AcceptRA={}", if accept_ra { "yes" } else { "no" })?;
        }

        if let Some(mtu) = common.mtu {
            writeln!(content)?;
            writeln!(content, "[Link]")?;
            writeln!(content, "MTUBytes={}", mtu)?;
        }

        for route in &common.routes {
            writeln!(content)?;
            writeln!(content, "[Route]")?;
            if route.to != "default" {
                writeln!(content, "Destination={}", route.to)?;
            }
            if let Some(via) = &route.via {
                writeln!(content, "Gateway={}", via)?;
            }
            if let Some(metric) = route.metric {
                writeln!(content, "Metric={}", metric)?;
            }
        }

        Ok(content)
    }

    fn render_link_section(&self, match_config: &MatchConfig, config: &EthernetConfig) -> Result<String, fmt::Error> {
        let mut content = String::new();

        writeln!(content, "[Match]")?;
        if let Some(mac) = &match_config.macaddress {
            writeln!(content, "MACAddress={}", mac)?;
        }
        writeln!(content)?;

        writeln!(content, "[Link]")?;
        if let Some(set_name) = &config.set_name {
            writeln!(content, "Name={}", set_name)?;
        }
        if let Some(mtu) = config.common.mtu {
            writeln!(content, "MTUBytes={}", mtu)?;
        }

        Ok(content)
    }
}

impl Renderer for NetworkdRenderer {
    fn render(&self, config: &NetworkConfig) -> Result<Vec<RenderedFile>, CloudInitError> {
        let mut files = Vec::new();
        let mut priority = 10u32;

        for (name, eth_config) in &config.ethernets {
            let rendered = self
                .render_ethernet(name, eth_config, priority)
                .map_err(|e| CloudInitError::InvalidData(format!("rendering {}: {}", name, e)))?;
            files.extend(rendered);
            priority += 10;
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NameserverConfig;
    use std::collections::BTreeMap;

    fn single(name: &str, eth: EthernetConfig) -> NetworkConfig {
        let mut ethernets = BTreeMap::new();
        ethernets.insert(name.to_string(), eth);
        NetworkConfig {
            version: 2,
            ethernets,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_dhcp() {
        let config = single(
            "eth0",
            EthernetConfig {
                common: InterfaceCommon {
                    dhcp4: Some(true),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let files = NetworkdRenderer::new().render(&config).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "10-cloud-init-eth0.network");
        assert!(files[0].content.contains("Name=eth0"));
        assert!(files[0].content.contains("DHCP=ipv4"));
    }

    #[test]
    fn test_render_static_with_mac_match() {
        let config = single(
            "ens5",
            EthernetConfig {
                common: InterfaceCommon {
                    addresses: vec!["192.168.1.10/24".to_string()],
                    gateway4: Some("192.168.1.1".to_string()),
                    nameservers: NameserverConfig {
                        addresses: vec!["8.8.8.8".to_string()],
                        ..Default::default()
                    },
                    ..Default::default()
                },
                match_config: Some(MatchConfig {
                    macaddress: Some("52:54:00:12:34:56".to_string()),
                    ..Default::default()
                }),
                set_name: Some("ens5".to_string()),
            },
        );

        let files = NetworkdRenderer::new().render(&config).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files[0].content.contains("MACAddress=52:54:00:12:34:56"));
        assert!(files[0].content.contains("Address=192.168.1.10/24"));
        assert!(files[0].content.contains("Gateway=192.168.1.1"));
        assert!(files[0].content.contains("DNS=8.8.8.8"));
        assert!(files[1].path.ends_with(".link"));
        assert!(files[1].content.contains("Name=ens5"));
    }
}
