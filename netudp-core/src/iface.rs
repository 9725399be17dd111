//! Network interface enumeration.
//!
//! The worker needs to know, for every network interface on the host, whether
//! it is up, running, and capable of multicast. This module defines the
//! contract ([`InterfaceProvider`]) the worker consumes and ships one
//! concrete implementation ([`PnetInterfaceProvider`]) backed by
//! `pnet::datalink`.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;

/// Snapshot of a single network interface's capability flags.
///
/// Mirrors the fields the worker's capability test (§4.1.3) needs: a
/// group is only ever joined on interfaces that are valid, up,
/// running, and either multicast-capable or loopback-with-loopback-enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name, e.g. `eth0` or `lo`.
    pub name: String,
    /// Whether the OS considers this a usable interface entry.
    pub is_valid: bool,
    /// IFF_UP.
    pub is_up: bool,
    /// IFF_RUNNING (link carrier present).
    pub is_running: bool,
    /// IFF_BROADCAST.
    pub can_broadcast: bool,
    /// IFF_MULTICAST.
    pub can_multicast: bool,
    /// IFF_LOOPBACK.
    pub is_loopback: bool,
    /// IFF_POINTOPOINT.
    pub is_point_to_point: bool,
    /// OS interface index, needed to pin IPv6 multicast joins/sends.
    pub index: u32,
    /// First IPv4 address bound to this interface, if any. Needed to join
    /// IPv4 multicast groups and to pin outgoing multicast sockets, which
    /// the BSD sockets API addresses by local interface address rather than
    /// by name.
    pub ipv4_addr: Option<Ipv4Addr>,
    /// First IPv6 address bound to this interface, if any.
    pub ipv6_addr: Option<Ipv6Addr>,
}

impl InterfaceInfo {
    /// Capability test from §4.1.3: valid ∧ up ∧ running ∧ (canMulticast ∨
    /// (multicast_loopback ∧ isLoopback)).
    pub fn is_capable(&self, multicast_loopback: bool) -> bool {
        self.is_valid
            && self.is_up
            && self.is_running
            && (self.can_multicast || (multicast_loopback && self.is_loopback))
    }
}

/// Enumerates network interfaces and looks them up by name.
///
/// Implementations may cache; `allow_cache` lets a caller that has just
/// observed an interface change (or is in a tight retry loop) force a fresh
/// read. Cached lookups up to 3 seconds old are acceptable.
pub trait InterfaceProvider: Send + Sync {
    /// List every interface currently known to the OS.
    fn interfaces(&self, allow_cache: bool) -> Vec<InterfaceInfo>;

    /// Look up a single interface by name.
    fn interface(&self, name: &str, allow_cache: bool) -> Option<InterfaceInfo> {
        self.interfaces(allow_cache)
            .into_iter()
            .find(|i| i.name == name)
    }
}

const CACHE_TTL: Duration = Duration::from_secs(3);

/// Default [`InterfaceProvider`] backed by `pnet::datalink::interfaces()`.
///
/// `pnet` does not expose a distinct "link carrier present" bit on every
/// platform; where it is unavailable this implementation folds `is_running`
/// into `is_up` (documented in `DESIGN.md`).
pub struct PnetInterfaceProvider {
    cache: Mutex<Option<(Instant, Vec<InterfaceInfo>)>>,
}

impl std::fmt::Debug for PnetInterfaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PnetInterfaceProvider").finish_non_exhaustive()
    }
}

impl Default for PnetInterfaceProvider {
    fn default() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }
}

impl PnetInterfaceProvider {
    /// Create a new provider with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn fetch() -> Vec<InterfaceInfo> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let ipv4_addr = iface.ips.iter().find_map(|net| match net {
                    IpNetwork::V4(v4) => Some(v4.ip()),
                    _ => None,
                });
                let ipv6_addr = iface.ips.iter().find_map(|net| match net {
                    IpNetwork::V6(v6) => Some(v6.ip()),
                    _ => None,
                });
                InterfaceInfo {
                    name: iface.name.clone(),
                    is_valid: true,
                    is_up: iface.is_up(),
                    is_running: iface.is_up(),
                    can_broadcast: iface.is_broadcast(),
                    can_multicast: iface.is_multicast(),
                    is_loopback: iface.is_loopback(),
                    is_point_to_point: iface.is_point_to_point(),
                    index: iface.index,
                    ipv4_addr,
                    ipv6_addr,
                }
            })
            .collect()
    }
}

impl InterfaceProvider for PnetInterfaceProvider {
    fn interfaces(&self, allow_cache: bool) -> Vec<InterfaceInfo> {
        let mut guard = self.cache.lock();
        if allow_cache {
            if let Some((fetched_at, cached)) = guard.as_ref() {
                if fetched_at.elapsed() < CACHE_TTL {
                    return cached.clone();
                }
            }
        }
        let fresh = Self::fetch();
        *guard = Some((Instant::now(), fresh.clone()));
        fresh
    }
}

/// A fixed set of interfaces, for deterministic tests.
///
/// Lets tests simulate interface appearance/disappearance (S6) without
/// touching the real network stack.
#[derive(Debug, Default)]
pub struct StaticInterfaceProvider {
    interfaces: Mutex<Vec<InterfaceInfo>>,
}

impl StaticInterfaceProvider {
    /// Build a provider that always reports `interfaces`.
    pub fn new(interfaces: Vec<InterfaceInfo>) -> Self {
        Self {
            interfaces: Mutex::new(interfaces),
        }
    }

    /// Replace the reported interface set, simulating a topology change.
    pub fn set(&self, interfaces: Vec<InterfaceInfo>) {
        *self.interfaces.lock() = interfaces;
    }
}

impl InterfaceProvider for StaticInterfaceProvider {
    fn interfaces(&self, _allow_cache: bool) -> Vec<InterfaceInfo> {
        self.interfaces.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, up: bool, multicast: bool, loopback: bool) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            is_valid: true,
            is_up: up,
            is_running: up,
            can_broadcast: !loopback,
            can_multicast: multicast,
            is_loopback: loopback,
            is_point_to_point: false,
            index: 0,
            ipv4_addr: if loopback {
                Some(Ipv4Addr::LOCALHOST)
            } else {
                Some(Ipv4Addr::new(192, 168, 1, 10))
            },
            ipv6_addr: None,
        }
    }

    #[test]
    fn capability_requires_up_and_multicast() {
        let lo = iface("lo", true, false, true);
        assert!(!lo.is_capable(false));
        assert!(lo.is_capable(true));

        let eth0 = iface("eth0", true, true, false);
        assert!(eth0.is_capable(false));

        let down = iface("eth1", false, true, false);
        assert!(!down.is_capable(false));
    }

    #[test]
    fn static_provider_reflects_topology_changes() {
        let provider = StaticInterfaceProvider::new(vec![iface("lo", true, false, true)]);
        assert_eq!(provider.interfaces(true).len(), 1);

        provider.set(vec![
            iface("lo", true, false, true),
            iface("eth0", true, true, false),
        ]);
        assert_eq!(provider.interfaces(true).len(), 2);
        assert_eq!(
            provider.interface("eth0", true).map(|i| i.name),
            Some("eth0".to_string())
        );
    }
}
