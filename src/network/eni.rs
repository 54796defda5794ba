//! Legacy ENI conversion
//!
//! Older seeds carry `/etc/network/interfaces` text in the
//! `network-interfaces` metadata key. It is converted into a v1 network
//! config so the rest of the crate only deals with structured configs.

use serde_yaml::{Mapping, Value};
use tracing::debug;

#[derive(Debug, Default)]
struct Iface {
    name: String,
    mac_address: Option<String>,
    mtu: Option<u64>,
    subnets: Vec<Subnet>,
}

#[derive(Debug, Default)]
struct Subnet {
    kind: &'static str,
    address: Option<String>,
    netmask: Option<String>,
    gateway: Option<String>,
    dns_nameservers: Vec<String>,
    dns_search: Vec<String>,
}

fn subnet_kind(family: &str, method: &str) -> Option<&'static str> {
    match (family, method) {
        ("inet", "dhcp") => Some("dhcp4"),
        ("inet", "static") => Some("static"),
        ("inet6", "dhcp") => Some("dhcp6"),
        ("inet6", "auto") => Some("ipv6_slaac"),
        ("inet6", "static") => Some("static6"),
        _ => None,
    }
}

/// Convert ENI text into a v1 network config
pub fn convert_eni_data(text: &str) -> Value {
    let mut ifaces: Vec<Iface> = Vec::new();
    // Index of the iface whose options are being read
    let mut current: Option<usize> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        match keyword {
            "auto" | "source" | "source-directory" | "mapping" => current = None,
            k if k.starts_with("allow-") => current = None,
            "iface" => {
                let [name, family, method, ..] = args[..] else {
                    current = None;
                    continue;
                };
                if method == "loopback" || name == "lo" {
                    current = None;
                    continue;
                }

                let idx = match ifaces.iter().position(|i| i.name == name) {
                    Some(idx) => idx,
                    None => {
                        ifaces.push(Iface {
                            name: name.to_string(),
                            ..Default::default()
                        });
                        ifaces.len() - 1
                    }
                };
                if let Some(kind) = subnet_kind(family, method) {
                    ifaces[idx].subnets.push(Subnet {
                        kind,
                        ..Default::default()
                    });
                }
                current = Some(idx);
            }
            option => {
                let Some(idx) = current else {
                    debug!("Ignoring ENI line outside an iface stanza: {}", line);
                    continue;
                };
                apply_option(&mut ifaces[idx], option, &args);
            }
        }
    }

    let mut config = Vec::new();
    for iface in ifaces {
        config.push(Value::Mapping(iface_to_v1(iface)));
    }

    let mut root = Mapping::new();
    root.insert("version".into(), 1.into());
    root.insert("config".into(), Value::Sequence(config));
    Value::Mapping(root)
}

fn apply_option(iface: &mut Iface, option: &str, args: &[&str]) {
    match option {
        "hwaddress" => {
            // `hwaddress ether XX:..` or `hwaddress XX:..`
            iface.mac_address = args.last().map(|m| m.to_lowercase());
            return;
        }
        "mtu" => {
            iface.mtu = args.first().and_then(|m| m.parse().ok());
            return;
        }
        _ => {}
    }

    let Some(subnet) = iface.subnets.last_mut() else {
        return;
    };
    let first = args.first().map(|s| s.to_string());
    match option {
        "address" => subnet.address = first,
        "netmask" => subnet.netmask = first,
        "gateway" => subnet.gateway = first,
        "dns-nameservers" => subnet.dns_nameservers.extend(args.iter().map(|s| s.to_string())),
        "dns-search" => subnet.dns_search.extend(args.iter().map(|s| s.to_string())),
        _ => debug!("Ignoring ENI option {} for {}", option, iface.name),
    }
}

fn iface_to_v1(iface: Iface) -> Mapping {
    let mut item = Mapping::new();
    item.insert("type".into(), "physical".into());
    item.insert("name".into(), iface.name.into());
    if let Some(mac) = iface.mac_address {
        item.insert("mac_address".into(), mac.into());
    }
    if let Some(mtu) = iface.mtu {
        item.insert("mtu".into(), mtu.into());
    }

    let subnets = iface
        .subnets
        .into_iter()
        .map(|s| {
            let mut m = Mapping::new();
            m.insert("type".into(), s.kind.into());
            for (key, value) in [("address", s.address), ("netmask", s.netmask), ("gateway", s.gateway)] {
                if let Some(v) = value {
                    m.insert(key.into(), v.into());
                }
            }
            if !s.dns_nameservers.is_empty() {
                m.insert("dns_nameservers".into(), s.dns_nameservers.into());
            }
            if !s.dns_search.is_empty() {
                m.insert("dns_search".into(), s.dns_search.into());
            }
            Value::Mapping(m)
        })
        .collect();
    item.insert("subnets".into(), Value::Sequence(subnets));
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::parse_network_config;

    const ENI: &str = r#"
# The loopback interface
auto lo
iface lo inet loopback

auto eth0
iface eth0 inet static
    address 192.168.1.10
    netmask 255.255.255.0
    gateway 192.168.1.1
    dns-nameservers 8.8.8.8 8.8.4.4
    hwaddress ether 52:54:00:AA:BB:CC

auto eth1
iface eth1 inet dhcp
iface eth1 inet6 auto
"#;

    #[test]
    fn test_convert_static_and_dhcp() {
        let v1 = convert_eni_data(ENI);
        assert_eq!(v1["version"], Value::from(1));

        let items = v1["config"].as_sequence().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["name"], Value::from("eth0"));
        assert_eq!(items[0]["mac_address"], Value::from("52:54:00:aa:bb:cc"));
        assert_eq!(items[0]["subnets"][0]["type"], Value::from("static"));
        assert_eq!(items[1]["subnets"].as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn test_converted_config_parses() {
        let config = parse_network_config(&convert_eni_data(ENI)).unwrap();

        let eth0 = &config.ethernets["eth0"];
        assert_eq!(eth0.common.addresses, vec!["192.168.1.10/24"]);
        assert_eq!(eth0.common.nameservers.addresses, vec!["8.8.8.8", "8.8.4.4"]);
        assert!(crate::network::config_has_mac(&convert_eni_data(ENI), "52:54:00:AA:BB:CC"));

        let eth1 = &config.ethernets["eth1"];
        assert_eq!(eth1.common.dhcp4, Some(true));
        assert_eq!(eth1.common.accept_ra, Some(true));
    }

    #[test]
    fn test_empty_input() {
        let v1 = convert_eni_data("");
        assert!(v1["config"].as_sequence().unwrap().is_empty());
    }
}
