//! Update events
//!
//! Events that may cause a datasource to re-read its metadata, grouped by
//! the scope of configuration they affect.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Category of configuration an event applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventScope {
    Network,
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
        }
    }
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    BootNewInstance,
    Boot,
    BootLegacy,
    Hotplug,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootNewInstance => "boot-new-instance",
            Self::Boot => "boot",
            Self::BootLegacy => "boot-legacy",
            Self::Hotplug => "hotplug",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boot-new-instance" => Some(Self::BootNewInstance),
            "boot" => Some(Self::Boot),
            "boot-legacy" => Some(Self::BootLegacy),
            "hotplug" => Some(Self::Hotplug),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event types per scope
pub type UpdateEvents = BTreeMap<EventScope, BTreeSet<EventType>>;

/// Build an [`UpdateEvents`] for the network scope
pub fn network_events(events: &[EventType]) -> UpdateEvents {
    let mut map = UpdateEvents::new();
    map.insert(EventScope::Network, events.iter().copied().collect());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        for event in [
            EventType::BootNewInstance,
            EventType::Boot,
            EventType::BootLegacy,
            EventType::Hotplug,
        ] {
            assert_eq!(EventType::parse(event.as_str()), Some(event));
            assert_eq!(
                serde_json::to_string(&event).unwrap(),
                format!("\"{}\"", event)
            );
        }
        assert_eq!(EventType::parse("reboot"), None);
    }
}
