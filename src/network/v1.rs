//! Network config v1 (legacy format) parsing
//!
//! Parses the older list-based network configuration format and converts it
//! to v2. Only physical interfaces, nameservers and global routes are
//! carried over; other item types are skipped.

use super::lenient;
use super::{EthernetConfig, InterfaceCommon, MatchConfig, NameserverConfig, NetworkConfig, RouteConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Network config v1 format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfigV1 {
    /// Version (should be 1)
    #[serde(default, deserialize_with = "lenient::version")]
    pub version: u8,
    /// Network configuration items
    #[serde(default, deserialize_with = "lenient::valid_items")]
    pub config: Vec<ConfigItem>,
}

/// Individual configuration item in v1 format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConfigItem {
    #[serde(rename = "physical")]
    Physical(PhysicalConfig),
    #[serde(rename = "nameserver")]
    Nameserver(NameserverConfigV1),
    #[serde(rename = "route")]
    Route(RouteConfigV1),
    /// bond, bridge, vlan and anything newer
    #[serde(other)]
    Unsupported,
}

/// Physical interface configuration (v1)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicalConfig {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub mac_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub mtu: Option<u32>,
    #[serde(default, deserialize_with = "lenient::valid_items")]
    pub subnets: Vec<SubnetConfig>,
}

/// Subnet/IP configuration (v1)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// static, dhcp4, dhcp6, ipv6_slaac, ...
    #[serde(rename = "type")]
    pub subnet_type: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub netmask: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub gateway: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub dns_nameservers: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub dns_search: Vec<String>,
    #[serde(default, deserialize_with = "lenient::valid_items")]
    pub routes: Vec<RouteConfigV1>,
}

/// Nameserver configuration (v1)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NameserverConfigV1 {
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub address: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub search: Vec<String>,
}

/// Route configuration (v1)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfigV1 {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub gateway: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub metric: Option<u32>,
    /// Alternative to destination
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub network: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub netmask: Option<String>,
}

impl NetworkConfigV1 {
    /// Convert v1 config to v2 format
    pub fn to_v2(&self) -> NetworkConfig {
        debug!("Converting network config v1 to v2");

        let mut v2 = NetworkConfig {
            version: 2,
            ..Default::default()
        };

        let mut global_dns = NameserverConfig::default();

        for item in &self.config {
            match item {
                ConfigItem::Physical(phys) => {
                    v2.ethernets.insert(phys.name.clone(), convert_physical(phys));
                }
                ConfigItem::Nameserver(ns) => {
                    global_dns.addresses.extend(ns.address.iter().cloned());
                    global_dns.search.extend(ns.search.iter().cloned());
                }
                // v2 has no global routes; they need an owning interface
                ConfigItem::Route(_) | ConfigItem::Unsupported => {}
            }
        }

        if !global_dns.addresses.is_empty() || !global_dns.search.is_empty() {
            for eth in v2.ethernets.values_mut() {
                if eth.common.nameservers.addresses.is_empty() {
                    eth.common.nameservers = global_dns.clone();
                }
            }
        }

        v2
    }
}

fn convert_physical(phys: &PhysicalConfig) -> EthernetConfig {
    let mut common = InterfaceCommon {
        mtu: phys.mtu,
        ..Default::default()
    };
    apply_subnets(&mut common, &phys.subnets);

    EthernetConfig {
        common,
        match_config: phys.mac_address.as_ref().map(|mac| MatchConfig {
            macaddress: Some(mac.clone()),
            ..Default::default()
        }),
        set_name: phys.mac_address.as_ref().map(|_| phys.name.clone()),
    }
}

fn apply_subnets(common: &mut InterfaceCommon, subnets: &[SubnetConfig]) {
    for subnet in subnets {
        match subnet.subnet_type.as_str() {
            "dhcp" | "dhcp4" => common.dhcp4 = Some(true),
            "dhcp6" | "ipv6_dhcpv6-stateful" => common.dhcp6 = Some(true),
            "static" | "static4" | "static6" => {
                if let Some(addr) = &subnet.address {
                    let cidr = match &subnet.netmask {
                        Some(mask) if !addr.contains('/') => format!("{}/{}", addr, netmask_to_prefix(mask)),
                        _ => addr.clone(),
                    };
                    common.addresses.push(cidr);
                }

                if let Some(gw) = &subnet.gateway {
                    if gw.contains(':') {
                        common.gateway6 = Some(gw.clone());
                    } else {
                        common.gateway4 = Some(gw.clone());
                    }
                }
            }
            "ipv6_slaac" | "ipv6_dhcpv6-stateless" => common.accept_ra = Some(true),
            _ => {}
        }

        common
            .nameservers
            .addresses
            .extend(subnet.dns_nameservers.iter().cloned());
        common.nameservers.search.extend(subnet.dns_search.iter().cloned());

        for route in &subnet.routes {
            let to = route
                .destination
                .clone()
                .or_else(|| {
                    route.network.as_ref().map(|net| match &route.netmask {
                        Some(mask) => format!("{}/{}", net, netmask_to_prefix(mask)),
                        None => net.clone(),
                    })
                })
                .unwrap_or_else(|| "default".to_string());

            common.routes.push(RouteConfig {
                to,
                via: route.gateway.clone(),
                metric: route.metric,
            });
        }
    }
}

/// Convert netmask to CIDR prefix length
pub fn netmask_to_prefix(netmask: &str) -> u32 {
    if let Ok(prefix) = netmask.parse::<u32>() {
        return prefix;
    }

    let octets: Vec<u8> = netmask.split('.').filter_map(|s| s.parse().ok()).collect();
    if octets.len() != 4 {
        return 24;
    }
    octets.iter().map(|o| o.count_ones()).sum()
}
