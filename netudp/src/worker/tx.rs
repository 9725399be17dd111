//! Multicast transmission (§4.1 "Multicast transmission" and "Tx watcher"):
//! one OS socket per outgoing interface, torn down after idleness.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::Domain;
use tokio::time::Instant;
use tracing::warn;

use netudp_core::iface::InterfaceInfo;

use crate::config::{DEFAULT_MULTICAST_TTL, WATCHER_INTERVAL};
use crate::datagram::DatagramRecord;
use crate::socket::Socket;

use super::Worker;

impl Worker {
    pub(super) async fn send(&mut self, datagram: Arc<DatagramRecord>) {
        let Some(dest) = datagram.destination_address else {
            warn!("send with no destination address, dropping");
            return;
        };
        let target = SocketAddr::new(dest, datagram.destination_port);
        let payload = datagram.payload();

        if dest.is_multicast() {
            self.send_multicast(payload, target, datagram.hop_limit).await;
        } else {
            self.send_unicast(payload, target, datagram.hop_limit).await;
        }
    }

    async fn send_unicast(&mut self, payload: &[u8], target: SocketAddr, ttl: u8) {
        let Some(socket) = self.tx_socket.as_ref() else {
            return;
        };
        if ttl != 0 {
            let _ = socket.set_unicast_ttl(ttl as u32);
        }
        match socket.send_to(payload, target).await {
            Ok(n) => self.counters.record_tx(n),
            Err(err) => self.on_runtime_error(err).await,
        }
    }

    async fn send_multicast(&mut self, payload: &[u8], target: SocketAddr, ttl: u8) {
        if !self.multicast_tx_active {
            self.create_multicast_tx_sockets();
        }
        self.last_multicast_tx = Some(Instant::now());

        if self.multicast_tx_sockets.is_empty() {
            self.send_unicast(payload, target, ttl).await;
            return;
        }

        let effective_ttl = if ttl != 0 {
            ttl as u32
        } else {
            DEFAULT_MULTICAST_TTL as u32
        };

        let mut recorded = false;
        for (name, socket) in self.multicast_tx_sockets.iter() {
            let _ = socket.set_multicast_ttl(effective_ttl, self.domain);
            match socket.send_to(payload, target).await {
                Ok(n) => {
                    if !recorded {
                        self.counters.record_tx(n);
                        recorded = true;
                    }
                }
                Err(err) => {
                    warn!(interface = %name, error = %err, "multicast send failed on interface");
                }
            }
        }
    }

    fn outgoing_interfaces(&self, allow_cache: bool) -> Vec<InterfaceInfo> {
        let capable: Vec<InterfaceInfo> = self
            .interfaces
            .interfaces(allow_cache)
            .into_iter()
            .filter(|i| i.is_capable(self.config.multicast_loopback))
            .filter(|i| {
                if self.domain == Domain::IPV6 {
                    i.ipv6_addr.is_some()
                } else {
                    i.ipv4_addr.is_some()
                }
            })
            .collect();
        if self.config.multicast_outgoing_interfaces.is_empty() {
            capable
        } else {
            capable
                .into_iter()
                .filter(|i| self.config.multicast_outgoing_interfaces.contains(&i.name))
                .collect()
        }
    }

    fn create_multicast_tx_sockets(&mut self) {
        let interfaces = self.outgoing_interfaces(true);
        for iface in interfaces {
            self.create_tx_socket_for(&iface);
        }
        self.multicast_tx_active = true;
        self.tx_watcher_next = Some(Instant::now() + WATCHER_INTERVAL);
    }

    fn create_tx_socket_for(&mut self, iface: &InterfaceInfo) {
        let domain = self.domain;

        let socket = match Socket::bind_any(domain) {
            Ok(socket) => socket,
            Err(err) => {
                warn!(interface = %iface.name, error = %err, "failed to create multicast tx socket");
                self.failed_tx_interfaces.insert(iface.name.clone());
                return;
            }
        };

        let pinned = match iface.ipv4_addr {
            Some(addr) => socket.set_multicast_interface_v4(addr),
            None => socket.set_multicast_interface_v6(iface.index),
        };
        if let Err(err) = pinned {
            warn!(interface = %iface.name, error = %err, "failed to pin multicast tx interface");
            self.failed_tx_interfaces.insert(iface.name.clone());
            return;
        }

        let _ = socket.set_multicast_loopback(self.config.multicast_loopback, domain);
        self.multicast_tx_sockets.insert(iface.name.clone(), socket);
        self.failed_tx_interfaces.remove(&iface.name);
    }

    pub(super) fn teardown_tx_sockets(&mut self) {
        self.multicast_tx_sockets.clear();
        self.failed_tx_interfaces.clear();
        self.multicast_tx_active = false;
        self.last_multicast_tx = None;
        self.tx_watcher_next = None;
    }

    /// §4.1 "Tx watcher": idle teardown, interface-change reconciliation,
    /// and retry of interfaces that failed to get a tx socket.
    pub(super) async fn run_tx_watcher(&mut self) {
        if !self.multicast_tx_active {
            self.tx_watcher_next = None;
            return;
        }

        if let Some(last) = self.last_multicast_tx {
            if last.elapsed() > self.config.multicast_tx_idle_teardown {
                self.teardown_tx_sockets();
                return;
            }
        }

        let current = self.interfaces.interfaces(false);
        let current_names: BTreeSet<String> = current.iter().map(|i| i.name.clone()).collect();
        let by_name: BTreeMap<String, InterfaceInfo> =
            current.into_iter().map(|i| (i.name.clone(), i)).collect();

        if self.config.multicast_outgoing_interfaces.is_empty() {
            let known: BTreeSet<String> = self
                .multicast_tx_sockets
                .keys()
                .cloned()
                .chain(self.failed_tx_interfaces.iter().cloned())
                .collect();
            for name in current_names.difference(&known) {
                self.failed_tx_interfaces.insert(name.clone());
            }
        }

        let gone_active: Vec<String> = self
            .multicast_tx_sockets
            .keys()
            .filter(|name| !current_names.contains(*name))
            .cloned()
            .collect();
        for name in gone_active {
            self.multicast_tx_sockets.remove(&name);
        }

        let gone_failed: Vec<String> = self
            .failed_tx_interfaces
            .iter()
            .filter(|name| !current_names.contains(*name))
            .cloned()
            .collect();
        for name in gone_failed {
            self.failed_tx_interfaces.remove(&name);
        }

        let retry: Vec<String> = self.failed_tx_interfaces.iter().cloned().collect();
        for name in retry {
            if let Some(iface) = by_name.get(&name).cloned() {
                if iface.is_capable(self.config.multicast_loopback) {
                    self.create_tx_socket_for(&iface);
                }
            }
        }

        self.tx_watcher_next = Some(Instant::now() + WATCHER_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use netudp_core::pool::{DatagramPool, FreeListPool};
    use netudp_core::prelude::{InterfaceProvider, StaticInterfaceProvider};
    use std::net::Ipv4Addr;
    use tokio::sync::mpsc;

    fn iface(name: &str) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            is_valid: true,
            is_up: true,
            is_running: true,
            can_broadcast: true,
            can_multicast: true,
            is_loopback: false,
            is_point_to_point: false,
            index: 1,
            ipv4_addr: Some(Ipv4Addr::new(192, 168, 1, 10)),
            ipv6_addr: None,
        }
    }

    #[tokio::test]
    async fn idle_tx_sockets_are_torn_down() {
        let interfaces: Arc<dyn InterfaceProvider> =
            Arc::new(StaticInterfaceProvider::new(vec![iface("eth0")]));
        let pool: Arc<dyn DatagramPool> = FreeListPool::new(4);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut config = EndpointConfig::default();
        config.rx_address = Some(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        config.multicast_tx_idle_teardown = std::time::Duration::from_millis(0);
        let (mut worker, _commands) = super::Worker::new(config, interfaces, pool, events_tx);
        worker.on_start().await;

        worker.create_multicast_tx_sockets();
        assert!(worker.multicast_tx_active);
        worker.last_multicast_tx = Some(Instant::now() - std::time::Duration::from_secs(1));

        worker.run_tx_watcher().await;
        assert!(!worker.multicast_tx_active);
        assert!(worker.multicast_tx_sockets.is_empty());
    }
}
