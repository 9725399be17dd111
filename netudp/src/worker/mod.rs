//! The Worker (§4.1): owns every OS socket, drives the multicast membership
//! state machine, and supervises itself via a watchdog.
//!
//! Split across files by concern, all as `impl Worker` blocks against the
//! single struct defined here: lifecycle (this file), [`multicast`] (join/
//! leave/listening watcher), [`tx`] (multicast send sockets/tx watcher),
//! [`recv`] (the read loop) and [`counters`] (traffic counters).

mod counters;
mod multicast;
mod recv;
mod tx;

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use socket2::Domain;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use netudp_core::pool::DatagramPool;
use netudp_core::prelude::InterfaceProvider;

use crate::command::Command;
use crate::config::EndpointConfig;
use crate::event::EndpointEvent;
use crate::socket::Socket;

use counters::Counters;

/// Coarse worker lifecycle state, mirroring §4.1's `Idle → Binding → Bound →
/// Failing → Idle` FSM. Membership sub-state lives in `joined_groups`/
/// `failed_groups`, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Idle,
    Binding,
    Bound,
    Failing,
}

/// Owns the OS sockets and all mutable state behind a single execution
/// context (§5): one `tokio` task driven by [`Worker::run`]'s `select!`
/// loop, never accessed concurrently.
pub(crate) struct Worker {
    config: EndpointConfig,
    interfaces: Arc<dyn InterfaceProvider>,
    pool: Arc<dyn DatagramPool>,
    events: mpsc::UnboundedSender<EndpointEvent>,
    commands: mpsc::UnboundedReceiver<Command>,

    state: WorkerState,
    domain: Domain,
    tx_socket: Option<Socket>,
    rx_socket: Option<Socket>,
    is_bounded: bool,

    watchdog_deadline: Option<Instant>,

    all_multicast_interfaces: BTreeSet<String>,
    joined_groups: BTreeMap<String, BTreeSet<IpAddr>>,
    failed_groups: BTreeMap<String, BTreeSet<IpAddr>>,
    listening_watcher_next: Option<Instant>,

    multicast_tx_sockets: BTreeMap<String, Socket>,
    failed_tx_interfaces: BTreeSet<String>,
    multicast_tx_active: bool,
    last_multicast_tx: Option<Instant>,
    tx_watcher_next: Option<Instant>,

    counters: Counters,
    counter_next: Option<Instant>,
}

impl Worker {
    /// Build a worker plus the command sender its endpoint keeps. The
    /// worker itself is driven later by handing it to [`Worker::run`].
    pub(crate) fn new(
        config: EndpointConfig,
        interfaces: Arc<dyn InterfaceProvider>,
        pool: Arc<dyn DatagramPool>,
        events: mpsc::UnboundedSender<EndpointEvent>,
    ) -> (Self, mpsc::UnboundedSender<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let domain = domain_for(config.rx_address);
        let worker = Self {
            config,
            interfaces,
            pool,
            events,
            commands: rx,
            state: WorkerState::Idle,
            domain,
            tx_socket: None,
            rx_socket: None,
            is_bounded: false,
            watchdog_deadline: None,
            all_multicast_interfaces: BTreeSet::new(),
            joined_groups: BTreeMap::new(),
            failed_groups: BTreeMap::new(),
            listening_watcher_next: None,
            multicast_tx_sockets: BTreeMap::new(),
            failed_tx_interfaces: BTreeSet::new(),
            multicast_tx_active: false,
            last_multicast_tx: None,
            tx_watcher_next: None,
            counters: Counters::default(),
            counter_next: None,
        };
        (worker, tx)
    }

    /// Drive the worker until its command channel closes (the endpoint was
    /// dropped), then tear everything down.
    pub(crate) async fn run(mut self) {
        loop {
            let rx_ref = self.rx_socket.as_ref().or(self.tx_socket.as_ref());
            let want_rx = self.is_bounded && self.config.input_enabled;

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                res = recv::readable(rx_ref, want_rx) => {
                    match res {
                        Ok(()) => self.drain_rx().await,
                        Err(err) => self.on_runtime_error(err).await,
                    }
                }
                _ = sleep_until_opt(self.watchdog_deadline) => {
                    self.watchdog_deadline = None;
                    self.on_restart().await;
                }
                _ = sleep_until_opt(self.listening_watcher_next) => {
                    self.run_listening_watcher().await;
                }
                _ = sleep_until_opt(self.tx_watcher_next) => {
                    self.run_tx_watcher().await;
                }
                _ = sleep_until_opt(self.counter_next) => {
                    self.tick_counters();
                }
            }
        }
        self.on_stop().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.on_start().await,
            Command::Stop => self.on_stop().await,
            Command::Restart => self.on_restart().await,
            Command::ApplyConfig(new_config) => self.apply_config(new_config).await,
            Command::JoinGroup(group) => self.join_group(group).await,
            Command::LeaveGroup(group) => self.leave_group(group).await,
            Command::LeaveAllGroups => self.leave_all_groups().await,
            Command::JoinInterface(name) => self.join_interface(name).await,
            Command::LeaveInterface(name) => self.leave_interface(name).await,
            Command::LeaveAllInterfaces => self.leave_all_interfaces().await,
            Command::Send(datagram) => self.send(datagram).await,
        }
    }

    /// §4.1 Startup algorithm.
    async fn on_start(&mut self) {
        if self.tx_socket.is_some() {
            warn!("start requested while already running, ignoring");
            return;
        }
        self.joined_groups.clear();
        self.failed_groups.clear();
        self.all_multicast_interfaces.clear();
        self.counters = Counters::default();
        self.set_is_bounded(false);
        self.state = WorkerState::Binding;

        match self.bind() {
            Ok(()) => {
                self.state = WorkerState::Bound;
                self.set_is_bounded(true);
                self.apply_multicast_loopback();
                self.counter_next = Some(Instant::now() + crate::config::COUNTER_INTERVAL);
                if self.config.input_enabled && !self.config.multicast_listening_groups.is_empty()
                {
                    self.auto_join_all_interfaces().await;
                }
                debug!(?self.state, "worker bound");
            }
            Err(err) => {
                warn!(error = %err, "bind failed, scheduling watchdog restart");
                self.teardown_sockets();
                self.state = WorkerState::Failing;
                self.emit_socket_error(&err);
                self.arm_watchdog();
            }
        }
    }

    /// §4.1 Shutdown algorithm.
    async fn on_stop(&mut self) {
        self.watchdog_deadline = None;
        self.listening_watcher_next = None;
        self.tx_watcher_next = None;
        self.counter_next = None;

        self.teardown_tx_sockets();
        self.teardown_sockets();

        self.joined_groups.clear();
        self.failed_groups.clear();
        self.all_multicast_interfaces.clear();

        self.state = WorkerState::Idle;
        self.set_is_bounded(false);
    }

    async fn on_restart(&mut self) {
        info!("watchdog firing restart");
        #[cfg(feature = "metrics")]
        netudp_core::metrics::WATCHDOG_RESTARTS_TOTAL.inc();
        self.on_stop().await;
        self.on_start().await;
    }

    /// Reconfiguration (§4.1, §5): bind-affecting fields restart the
    /// worker; everything else is applied in place.
    async fn apply_config(&mut self, new_config: EndpointConfig) {
        let was_running = self.tx_socket.is_some();
        let needs_restart = was_running && self.config.binding_differs_from(&new_config);
        let loopback_changed = self.config.multicast_loopback != new_config.multicast_loopback;
        self.domain = domain_for(new_config.rx_address);
        self.config = new_config;

        if needs_restart {
            self.on_stop().await;
            self.on_start().await;
        } else if was_running && loopback_changed {
            self.apply_multicast_loopback();
        }
    }

    fn bind(&mut self) -> std::io::Result<()> {
        let rx_address = self.config.rx_address.unwrap_or_else(|| unspecified(self.domain));

        if self.config.needs_separate_rx_socket() {
            let rx_socket = Socket::bind(SocketAddr::new(rx_address, self.config.rx_port))?;
            let tx_socket = Socket::bind(SocketAddr::new(unspecified(self.domain), self.config.tx_port))?;
            self.rx_socket = Some(rx_socket);
            self.tx_socket = Some(tx_socket);
        } else if self.config.input_enabled {
            let socket = Socket::bind(SocketAddr::new(rx_address, self.config.rx_port))?;
            self.rx_socket = None;
            self.tx_socket = Some(socket);
        } else {
            let socket = Socket::bind(SocketAddr::new(unspecified(self.domain), self.config.tx_port))?;
            self.rx_socket = None;
            self.tx_socket = Some(socket);
        }
        Ok(())
    }

    fn teardown_sockets(&mut self) {
        self.tx_socket = None;
        self.rx_socket = None;
    }

    fn apply_multicast_loopback(&self) {
        if let Some(rx) = &self.rx_socket {
            let _ = rx.set_multicast_loopback(self.config.multicast_loopback, self.domain);
        }
        if let Some(tx) = &self.tx_socket {
            let _ = tx.set_multicast_loopback(self.config.multicast_loopback, self.domain);
        }
    }

    fn set_is_bounded(&mut self, bounded: bool) {
        if self.is_bounded != bounded {
            self.is_bounded = bounded;
            #[cfg(feature = "metrics")]
            netudp_core::metrics::IS_BOUNDED.set(bounded as i64);
            let _ = self.events.send(EndpointEvent::IsBoundedChanged(bounded));
        }
    }

    fn emit_socket_error(&self, err: &std::io::Error) {
        let _ = self.events.send(EndpointEvent::SocketError {
            code: err.raw_os_error(),
            description: err.to_string(),
        });
    }

    /// A runtime error observed while the worker was already bound: §7's
    /// "structural runtime" class. ICMP-unreachable (`ConnectionRefused`) is
    /// explicitly not fatal.
    async fn on_runtime_error(&mut self, err: std::io::Error) {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            debug!("ignoring ICMP-unreachable on rx socket");
            return;
        }
        warn!(error = %err, "runtime socket error, scheduling watchdog restart");
        self.emit_socket_error(&err);
        self.teardown_sockets();
        self.teardown_tx_sockets();
        self.state = WorkerState::Failing;
        self.set_is_bounded(false);
        self.arm_watchdog();
    }

    fn arm_watchdog(&mut self) {
        if self.watchdog_deadline.is_none() {
            self.watchdog_deadline = Some(Instant::now() + self.config.watchdog_period);
        }
    }
}

fn domain_for(rx_address: Option<IpAddr>) -> Domain {
    match rx_address {
        Some(IpAddr::V6(_)) => Domain::IPV6,
        _ => Domain::IPV4,
    }
}

fn unspecified(domain: Domain) -> IpAddr {
    if domain == Domain::IPV6 {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netudp_core::pool::FreeListPool;
    use netudp_core::prelude::StaticInterfaceProvider;

    fn test_worker() -> (Worker, mpsc::UnboundedSender<Command>, mpsc::UnboundedReceiver<EndpointEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let interfaces: Arc<dyn InterfaceProvider> = Arc::new(StaticInterfaceProvider::default());
        let pool: Arc<dyn DatagramPool> = FreeListPool::new(4);
        let mut config = EndpointConfig::default();
        config.rx_address = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let (worker, commands) = Worker::new(config, interfaces, pool, events_tx);
        (worker, commands, events_rx)
    }

    #[tokio::test]
    async fn start_then_stop_binds_and_unbinds() {
        let (mut worker, _commands, mut events) = test_worker();
        worker.on_start().await;
        assert!(worker.is_bounded);
        assert!(matches!(
            events.recv().await,
            Some(EndpointEvent::IsBoundedChanged(true))
        ));

        worker.on_stop().await;
        assert!(!worker.is_bounded);
        assert!(matches!(
            events.recv().await,
            Some(EndpointEvent::IsBoundedChanged(false))
        ));
    }

    #[tokio::test]
    async fn double_start_is_ignored() {
        let (mut worker, _commands, _events) = test_worker();
        worker.on_start().await;
        let first_local = worker.tx_socket.as_ref().unwrap().local_addr().unwrap();
        worker.on_start().await;
        let still_same = worker.tx_socket.as_ref().unwrap().local_addr().unwrap();
        assert_eq!(first_local, still_same);
    }
}
