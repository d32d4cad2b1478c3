//! Host directory: network address to self-reported hostname
//!
//! Hosts are created on the first valid packet from an unseen address and
//! carry a placeholder name until an identification ping arrives from them.

use serde::Serialize;
use std::net::Ipv4Addr;

use crate::protocol::PingPayload;

/// Hostname used until a host identifies itself
pub const HOST_PLACEHOLDER: &str = "*";

/// Identity details reported in a host's ping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    pub application: String,
    pub device: String,
    pub manufacturer: String,
    pub user: String,
    pub version: String,
    pub color: u32,
    pub preferred_rate: u32,
    pub device_type: u32,
    pub features: u32,
}

impl From<&PingPayload> for HostIdentity {
    fn from(ping: &PingPayload) -> Self {
        Self {
            application: ping.application_name.clone(),
            device: ping.device_name.clone(),
            manufacturer: ping.manufacturer_name.clone(),
            user: ping.user_name.clone(),
            version: ping.version_string(),
            color: ping.color_rgb,
            preferred_rate: ping.preferred_rate,
            device_type: ping.device_type,
            features: ping.features,
        }
    }
}

/// One slot of the host table
#[derive(Debug, Clone, Serialize)]
pub struct HostRecord {
    pub addr: Ipv4Addr,
    pub hostname: String,
    /// Millisecond timestamp of the last discovery ping we sent
    pub last_pinged: Option<u64>,
    pub identity: Option<HostIdentity>,
    pub active: bool,
}

impl HostRecord {
    /// Whether the host still carries the placeholder name
    pub fn is_unnamed(&self) -> bool {
        self.hostname == HOST_PLACEHOLDER
    }
}

impl Default for HostRecord {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::UNSPECIFIED,
            hostname: HOST_PLACEHOLDER.to_string(),
            last_pinged: None,
            identity: None,
            active: false,
        }
    }
}

/// Fixed-capacity host table with first-fit allocation
#[derive(Debug, Clone)]
pub struct HostDirectory {
    slots: Vec<HostRecord>,
}

impl HostDirectory {
    /// Create a table with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![HostRecord::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Register an address: existing index, else first inactive slot, else `None`
    pub fn add_host(&mut self, addr: Ipv4Addr) -> Option<usize> {
        let mut empty = None;
        for (i, host) in self.slots.iter().enumerate() {
            if host.active && host.addr == addr {
                return Some(i);
            }
            if empty.is_none() && !host.active {
                empty = Some(i);
            }
        }

        let slot = empty?;
        self.slots[slot] = HostRecord {
            addr,
            active: true,
            ..HostRecord::default()
        };
        tracing::debug!("Registered host {} in slot {}", addr, slot);
        Some(slot)
    }

    /// Index of the active host with this address
    pub fn find_by_addr(&self, addr: Ipv4Addr) -> Option<usize> {
        self.slots
            .iter()
            .position(|h| h.active && h.addr == addr)
    }

    /// Address of the first active host that identified itself with `name`
    pub fn addr_for_name(&self, name: &str) -> Option<Ipv4Addr> {
        if name == HOST_PLACEHOLDER {
            return None;
        }
        self.slots
            .iter()
            .find(|h| h.active && h.hostname == name)
            .map(|h| h.addr)
    }

    /// Hostname for an address, or the placeholder
    pub fn name_for_addr(&self, addr: Ipv4Addr) -> &str {
        self.find_by_addr(addr)
            .map(|i| self.slots[i].hostname.as_str())
            .unwrap_or(HOST_PLACEHOLDER)
    }

    /// Active host at `index`
    pub fn get(&self, index: usize) -> Option<&HostRecord> {
        self.slots.get(index).filter(|h| h.active)
    }

    /// Record the identity from a ping; returns true if the name changed
    pub fn set_identity(&mut self, index: usize, ping: &PingPayload) -> bool {
        let Some(host) = self.slots.get_mut(index).filter(|h| h.active) else {
            return false;
        };
        let new_name = if ping.host_name.is_empty() {
            HOST_PLACEHOLDER.to_string()
        } else {
            ping.host_name.clone()
        };
        let changed = host.hostname != new_name;
        host.hostname = new_name;
        host.identity = Some(HostIdentity::from(ping));
        changed
    }

    /// First host still unnamed whose last ping is older than `retry_ms`
    pub fn next_to_ping(&self, now: u64, retry_ms: u64) -> Option<usize> {
        self.slots.iter().position(|h| {
            h.active
                && h.is_unnamed()
                && h.last_pinged
                    .map_or(true, |t| now.saturating_sub(t) >= retry_ms)
        })
    }

    pub fn mark_pinged(&mut self, index: usize, now: u64) {
        if let Some(host) = self.slots.get_mut(index) {
            host.last_pinged = Some(now);
        }
    }

    /// Iterate `(index, host)` over active hosts
    pub fn iter(&self) -> impl Iterator<Item = (usize, &HostRecord)> {
        self.slots.iter().enumerate().filter(|(_, h)| h.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|h| h.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    #[test]
    fn test_add_host_is_idempotent() {
        let mut hosts = HostDirectory::new(4);
        let a = hosts.add_host(ip(10)).unwrap();
        let b = hosts.add_host(ip(10)).unwrap();
        assert_eq!(a, b);
        assert_eq!(hosts.active_count(), 1);
        assert_eq!(hosts.name_for_addr(ip(10)), HOST_PLACEHOLDER);
    }

    #[test]
    fn test_add_host_full_table() {
        let mut hosts = HostDirectory::new(2);
        assert_eq!(hosts.add_host(ip(1)), Some(0));
        assert_eq!(hosts.add_host(ip(2)), Some(1));
        assert_eq!(hosts.add_host(ip(3)), None);
        assert_eq!(hosts.add_host(ip(1)), Some(0));
    }

    #[test]
    fn test_identity_resolves_name() {
        let mut hosts = HostDirectory::new(4);
        let idx = hosts.add_host(ip(7)).unwrap();
        let ping = PingPayload {
            host_name: "studio".to_string(),
            ..Default::default()
        };
        assert!(hosts.set_identity(idx, &ping));
        assert!(!hosts.set_identity(idx, &ping));
        assert_eq!(hosts.addr_for_name("studio"), Some(ip(7)));
        assert_eq!(hosts.name_for_addr(ip(7)), "studio");
        assert_eq!(hosts.addr_for_name(HOST_PLACEHOLDER), None);
        assert_eq!(hosts.addr_for_name("nobody"), None);
    }

    #[test]
    fn test_ping_selection_respects_retry() {
        let mut hosts = HostDirectory::new(4);
        hosts.add_host(ip(1));
        hosts.add_host(ip(2));

        assert_eq!(hosts.next_to_ping(1000, 500), Some(0));
        hosts.mark_pinged(0, 1000);
        assert_eq!(hosts.next_to_ping(1100, 500), Some(1));
        hosts.mark_pinged(1, 1100);
        assert_eq!(hosts.next_to_ping(1200, 500), None);
        assert_eq!(hosts.next_to_ping(1500, 500), Some(0));
    }
}
