//! Multicast listening state machine (§4.1 "Multicast listening state
//! machine" and "Listening watcher").

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use tokio::time::Instant;
use tracing::warn;

use netudp_core::iface::InterfaceInfo;

use crate::config::WATCHER_INTERVAL;
use crate::event::EndpointEvent;

use super::Worker;

impl Worker {
    fn is_auto_mode(&self) -> bool {
        self.config.multicast_listening_interfaces.is_empty()
    }

    fn target_interfaces(&self, allow_cache: bool) -> Vec<InterfaceInfo> {
        let all = self.interfaces.interfaces(allow_cache);
        if self.is_auto_mode() {
            all
        } else {
            all.into_iter()
                .filter(|i| self.config.multicast_listening_interfaces.contains(&i.name))
                .collect()
        }
    }

    fn arm_listening_watcher(&mut self) {
        if self.listening_watcher_next.is_none() {
            self.listening_watcher_next = Some(Instant::now() + WATCHER_INTERVAL);
        }
    }

    /// Called once after a successful bind, when groups are already desired.
    pub(super) async fn auto_join_all_interfaces(&mut self) {
        let interfaces = self.target_interfaces(true);
        let groups: Vec<IpAddr> = self.config.multicast_listening_groups.iter().copied().collect();
        for iface in interfaces {
            if self.is_auto_mode() {
                self.all_multicast_interfaces.insert(iface.name.clone());
            }
            for &group in &groups {
                self.join_group_on_interface(group, &iface).await;
            }
        }
    }

    /// Join a group on one interface, updating `joined_groups`/
    /// `failed_groups` and emitting the appropriate event.
    async fn join_group_on_interface(&mut self, group: IpAddr, iface: &InterfaceInfo) {
        if !iface.is_capable(self.config.multicast_loopback) {
            self.failed_groups
                .entry(iface.name.clone())
                .or_default()
                .insert(group);
            self.arm_listening_watcher();
            return;
        }

        let joined = match self.rx_socket.as_ref().or(self.tx_socket.as_ref()) {
            Some(socket) => socket.join_multicast(group, iface.ipv4_addr, iface.index),
            None => return,
        };

        match joined {
            Ok(()) => {
                self.joined_groups
                    .entry(iface.name.clone())
                    .or_default()
                    .insert(group);
                #[cfg(feature = "metrics")]
                netudp_core::metrics::MULTICAST_GROUPS_JOINED
                    .with_label_values(&[&iface.name])
                    .inc();
                let _ = self.events.send(EndpointEvent::MulticastGroupJoined {
                    group,
                    interface: iface.name.clone(),
                });
            }
            Err(err) => {
                warn!(%group, interface = %iface.name, error = %err, "multicast join failed, will retry");
                self.failed_groups
                    .entry(iface.name.clone())
                    .or_default()
                    .insert(group);
            }
        }
        self.arm_listening_watcher();
    }

    pub(super) async fn join_group(&mut self, group: IpAddr) {
        if !group.is_multicast() {
            warn!(%group, "ignoring join_group for a non-multicast address");
            return;
        }
        if !self.config.multicast_listening_groups.insert(group) {
            return;
        }
        if self.tx_socket.is_none() {
            return;
        }
        let interfaces = self.target_interfaces(true);
        for iface in interfaces {
            if self.is_auto_mode() {
                self.all_multicast_interfaces.insert(iface.name.clone());
            }
            self.join_group_on_interface(group, &iface).await;
        }
    }

    async fn leave_group_everywhere(&mut self, group: IpAddr) {
        let joined_on: Vec<String> = self
            .joined_groups
            .iter()
            .filter(|(_, groups)| groups.contains(&group))
            .map(|(name, _)| name.clone())
            .collect();

        for name in joined_on {
            if let Some(iface) = self.interfaces.interface(&name, true) {
                if let Some(socket) = self.rx_socket.as_ref().or(self.tx_socket.as_ref()) {
                    let _ = socket.leave_multicast(group, iface.ipv4_addr, iface.index);
                }
            }
            if let Some(set) = self.joined_groups.get_mut(&name) {
                set.remove(&group);
                if set.is_empty() {
                    self.joined_groups.remove(&name);
                }
            }
            let _ = self.events.send(EndpointEvent::MulticastGroupLeft {
                group,
                interface: name,
            });
        }

        for set in self.failed_groups.values_mut() {
            set.remove(&group);
        }
        self.failed_groups.retain(|_, set| !set.is_empty());
    }

    pub(super) async fn leave_group(&mut self, group: IpAddr) {
        if !self.config.multicast_listening_groups.remove(&group) {
            return;
        }
        self.leave_group_everywhere(group).await;
        if self.config.multicast_listening_groups.is_empty() {
            self.listening_watcher_next = None;
        }
    }

    pub(super) async fn leave_all_groups(&mut self) {
        let groups: Vec<IpAddr> = self.config.multicast_listening_groups.iter().copied().collect();
        for group in groups {
            self.leave_group(group).await;
        }
    }

    pub(super) async fn join_interface(&mut self, name: String) {
        self.config.multicast_listening_interfaces.insert(name.clone());
        self.all_multicast_interfaces.clear();
        if self.tx_socket.is_none() {
            return;
        }
        if let Some(iface) = self.interfaces.interface(&name, true) {
            let groups: Vec<IpAddr> = self.config.multicast_listening_groups.iter().copied().collect();
            for group in groups {
                self.join_group_on_interface(group, &iface).await;
            }
        }
    }

    pub(super) async fn leave_interface(&mut self, name: String) {
        self.config.multicast_listening_interfaces.remove(&name);

        if let Some(iface) = self.interfaces.interface(&name, true) {
            if let Some(socket) = self.rx_socket.as_ref().or(self.tx_socket.as_ref()) {
                for group in self.joined_groups.get(&name).cloned().unwrap_or_default() {
                    let _ = socket.leave_multicast(group, iface.ipv4_addr, iface.index);
                    let _ = self.events.send(EndpointEvent::MulticastGroupLeft {
                        group,
                        interface: name.clone(),
                    });
                }
            }
        }
        self.joined_groups.remove(&name);
        self.failed_groups.remove(&name);
    }

    pub(super) async fn leave_all_interfaces(&mut self) {
        let names: Vec<String> = self.config.multicast_listening_interfaces.iter().cloned().collect();
        for name in names {
            self.leave_interface(name).await;
        }
    }

    /// §4.1 "Listening watcher": periodic reconciliation of desired vs
    /// actual multicast membership.
    pub(super) async fn run_listening_watcher(&mut self) {
        if self.config.multicast_listening_groups.is_empty() {
            self.listening_watcher_next = None;
            return;
        }

        let current = self.interfaces.interfaces(false);
        let current_names: BTreeSet<String> = current.iter().map(|i| i.name.clone()).collect();

        if self.is_auto_mode() {
            let appeared: Vec<String> = current_names
                .difference(&self.all_multicast_interfaces)
                .cloned()
                .collect();
            for name in appeared {
                self.all_multicast_interfaces.insert(name.clone());
                self.failed_groups
                    .entry(name)
                    .or_default()
                    .extend(self.config.multicast_listening_groups.iter().copied());
            }

            let vanished: Vec<String> = self
                .all_multicast_interfaces
                .difference(&current_names)
                .cloned()
                .collect();
            for name in vanished {
                if let Some(groups) = self.joined_groups.remove(&name) {
                    for group in groups {
                        let _ = self.events.send(EndpointEvent::MulticastGroupLeft {
                            group,
                            interface: name.clone(),
                        });
                    }
                }
                self.failed_groups.remove(&name);
                self.all_multicast_interfaces.remove(&name);
            }
        }

        let by_name: BTreeMap<String, InterfaceInfo> =
            current.into_iter().map(|i| (i.name.clone(), i)).collect();

        let newly_incapable: Vec<String> = self
            .joined_groups
            .keys()
            .filter(|name| {
                by_name
                    .get(*name)
                    .map(|i| !i.is_capable(self.config.multicast_loopback))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        for name in newly_incapable {
            if let Some(groups) = self.joined_groups.remove(&name) {
                self.failed_groups.entry(name).or_default().extend(groups);
            }
        }

        let retry_names: Vec<String> = self.failed_groups.keys().cloned().collect();
        for name in retry_names {
            let iface = match by_name.get(&name) {
                Some(iface) if iface.is_capable(self.config.multicast_loopback) => iface.clone(),
                _ => continue,
            };
            let pending: Vec<IpAddr> = self
                .failed_groups
                .get(&name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            for group in pending {
                let result = match self.rx_socket.as_ref().or(self.tx_socket.as_ref()) {
                    Some(socket) => socket.join_multicast(group, iface.ipv4_addr, iface.index),
                    None => continue,
                };
                if result.is_ok() {
                    if let Some(set) = self.failed_groups.get_mut(&name) {
                        set.remove(&group);
                    }
                    self.joined_groups
                        .entry(name.clone())
                        .or_default()
                        .insert(group);
                    let _ = self.events.send(EndpointEvent::MulticastGroupJoined {
                        group,
                        interface: name.clone(),
                    });
                }
            }
        }
        self.failed_groups.retain(|_, set| !set.is_empty());

        if self.joined_groups.is_empty() && self.failed_groups.is_empty() {
            self.listening_watcher_next = None;
        } else {
            self.listening_watcher_next = Some(Instant::now() + WATCHER_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use netudp_core::pool::{DatagramPool, FreeListPool};
    use netudp_core::prelude::{InterfaceProvider, StaticInterfaceProvider};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn iface(name: &str, multicast: bool) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            is_valid: true,
            is_up: true,
            is_running: true,
            can_broadcast: true,
            can_multicast: multicast,
            is_loopback: name == "lo",
            is_point_to_point: false,
            index: 1,
            ipv4_addr: Some(Ipv4Addr::new(192, 168, 1, 10)),
            ipv6_addr: None,
        }
    }

    async fn running_worker(interfaces: Arc<StaticInterfaceProvider>) -> super::Worker {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let pool: Arc<dyn DatagramPool> = FreeListPool::new(4);
        let providers: Arc<dyn InterfaceProvider> = interfaces;
        let mut config = EndpointConfig::default();
        config.rx_address = Some(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let (mut worker, _commands) = super::Worker::new(config, providers, pool, events_tx);
        worker.on_start().await;
        worker
    }

    #[tokio::test]
    async fn join_on_incapable_interface_is_retried_later() {
        let interfaces = Arc::new(StaticInterfaceProvider::new(vec![iface("eth0", false)]));
        let mut worker = running_worker(interfaces.clone()).await;

        worker.join_group("239.1.2.3".parse().unwrap()).await;
        assert!(worker.joined_groups.is_empty());
        assert!(worker.failed_groups.contains_key("eth0"));

        interfaces.set(vec![iface("eth0", true)]);
        worker.run_listening_watcher().await;
        assert!(worker.failed_groups.is_empty());
        assert!(worker
            .joined_groups
            .get("eth0")
            .map(|g| g.contains(&"239.1.2.3".parse().unwrap()))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn non_multicast_join_is_ignored() {
        let interfaces = Arc::new(StaticInterfaceProvider::new(vec![iface("eth0", true)]));
        let mut worker = running_worker(interfaces).await;
        worker.join_group("10.0.0.1".parse().unwrap()).await;
        assert!(worker.config.multicast_listening_groups.is_empty());
    }

    #[tokio::test]
    async fn interface_appearance_is_auto_joined() {
        let interfaces = Arc::new(StaticInterfaceProvider::new(vec![iface("lo", true)]));
        let mut worker = running_worker(interfaces.clone()).await;

        worker.join_group("239.1.2.3".parse().unwrap()).await;
        assert!(worker.joined_groups.contains_key("lo"));

        interfaces.set(vec![iface("lo", true), iface("eth0", true)]);
        worker.run_listening_watcher().await;
        assert!(worker.joined_groups.contains_key("eth0"));
    }
}
