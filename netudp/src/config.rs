//! Endpoint configuration (§3).
//!
//! A plain struct with setters that report whether they actually changed
//! anything, replacing the source's property-macro auto-getters/setters and
//! change-notification signals (§9). The Endpoint uses the "changed?"
//! return value to decide whether a reconfiguration needs to restart the
//! worker.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;

/// Default milliseconds between watchdog-triggered restart attempts.
pub const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_millis(5000);
/// Default interval for the listening and tx watchers.
pub const WATCHER_INTERVAL: Duration = Duration::from_millis(2500);
/// Default interval for the traffic counter tick.
pub const COUNTER_INTERVAL: Duration = Duration::from_millis(1000);
/// Default multicast TTL used when a datagram doesn't specify one.
pub const DEFAULT_MULTICAST_TTL: u8 = 8;
/// Default multicast tx socket idle teardown.
pub const DEFAULT_MULTICAST_TX_IDLE_TEARDOWN: Duration = Duration::from_millis(10_000);

/// Mutable endpoint configuration. Every field can be changed at runtime
/// through the `Endpoint` setters; fields marked "bind-affecting" below
/// trigger a stop+start sequence when changed while running.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Bind address for receiving; `None` means "any". Bind-affecting.
    pub rx_address: Option<IpAddr>,
    /// Bind port for receiving. Bind-affecting.
    pub rx_port: u16,
    /// Port to transmit from; `0` means OS-assigned. Bind-affecting.
    pub tx_port: u16,
    /// Force two OS sockets (rx and tx) instead of sharing one. Bind-affecting.
    pub separate_rx_tx: bool,
    /// If false, the endpoint is send-only. Bind-affecting.
    pub input_enabled: bool,
    /// Milliseconds between watchdog restart attempts.
    pub watchdog_period: Duration,
    /// Request local delivery of transmitted multicast datagrams.
    pub multicast_loopback: bool,
    /// Multicast groups to join for receiving.
    pub multicast_listening_groups: BTreeSet<IpAddr>,
    /// Interfaces to join on; empty means "all capable interfaces".
    pub multicast_listening_interfaces: BTreeSet<String>,
    /// Interfaces to transmit multicast on; empty means "all capable interfaces".
    pub multicast_outgoing_interfaces: BTreeSet<String>,
    /// Idle duration after which per-interface multicast tx sockets are torn down.
    pub multicast_tx_idle_teardown: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            rx_address: None,
            rx_port: 0,
            tx_port: 0,
            separate_rx_tx: false,
            input_enabled: true,
            watchdog_period: DEFAULT_WATCHDOG_PERIOD,
            multicast_loopback: false,
            multicast_listening_groups: BTreeSet::new(),
            multicast_listening_interfaces: BTreeSet::new(),
            multicast_outgoing_interfaces: BTreeSet::new(),
            multicast_tx_idle_teardown: DEFAULT_MULTICAST_TX_IDLE_TEARDOWN,
        }
    }
}

impl EndpointConfig {
    /// Set `rx_address`, returning whether it changed.
    pub fn set_rx_address(&mut self, address: Option<IpAddr>) -> bool {
        if self.rx_address != address {
            self.rx_address = address;
            true
        } else {
            false
        }
    }

    /// Set `rx_port`, returning whether it changed.
    pub fn set_rx_port(&mut self, port: u16) -> bool {
        if self.rx_port != port {
            self.rx_port = port;
            true
        } else {
            false
        }
    }

    /// Set `tx_port`, returning whether it changed.
    pub fn set_tx_port(&mut self, port: u16) -> bool {
        if self.tx_port != port {
            self.tx_port = port;
            true
        } else {
            false
        }
    }

    /// Set `separate_rx_tx`, returning whether it changed.
    pub fn set_separate_rx_tx(&mut self, separate: bool) -> bool {
        if self.separate_rx_tx != separate {
            self.separate_rx_tx = separate;
            true
        } else {
            false
        }
    }

    /// Set `input_enabled`, returning whether it changed.
    pub fn set_input_enabled(&mut self, enabled: bool) -> bool {
        if self.input_enabled != enabled {
            self.input_enabled = enabled;
            true
        } else {
            false
        }
    }

    /// Set `watchdog_period`. Never bind-affecting.
    pub fn set_watchdog_period(&mut self, period: Duration) -> bool {
        if self.watchdog_period != period {
            self.watchdog_period = period;
            true
        } else {
            false
        }
    }

    /// Set `multicast_loopback`. Never bind-affecting (it changes join/tx
    /// socket options, not the bind itself).
    pub fn set_multicast_loopback(&mut self, loopback: bool) -> bool {
        if self.multicast_loopback != loopback {
            self.multicast_loopback = loopback;
            true
        } else {
            false
        }
    }

    /// Set the pinned set of outgoing multicast interfaces; empty means
    /// "every capable interface". Never bind-affecting.
    pub fn set_multicast_outgoing_interfaces(&mut self, interfaces: BTreeSet<String>) -> bool {
        if self.multicast_outgoing_interfaces != interfaces {
            self.multicast_outgoing_interfaces = interfaces;
            true
        } else {
            false
        }
    }

    /// Whether any of the bind-affecting fields would change if `other`
    /// were applied in place of the corresponding fields in `self`.
    pub fn binding_differs_from(&self, other: &EndpointConfig) -> bool {
        self.rx_address != other.rx_address
            || self.rx_port != other.rx_port
            || self.tx_port != other.tx_port
            || self.separate_rx_tx != other.separate_rx_tx
            || self.input_enabled != other.input_enabled
    }

    /// Whether a second, distinct OS socket is needed for receiving.
    pub fn needs_separate_rx_socket(&self) -> bool {
        self.input_enabled && (self.separate_rx_tx || self.tx_port != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_report_whether_they_changed_anything() {
        let mut cfg = EndpointConfig::default();
        assert!(cfg.set_rx_port(1234));
        assert!(!cfg.set_rx_port(1234));
        assert!(cfg.set_rx_port(4321));
    }

    #[test]
    fn needs_separate_rx_socket_follows_input_and_port_rules() {
        let mut cfg = EndpointConfig::default();
        assert!(!cfg.needs_separate_rx_socket());

        cfg.set_tx_port(4000);
        assert!(cfg.needs_separate_rx_socket());

        cfg.set_tx_port(0);
        cfg.set_separate_rx_tx(true);
        assert!(cfg.needs_separate_rx_socket());

        cfg.set_input_enabled(false);
        assert!(!cfg.needs_separate_rx_socket());
    }

    #[test]
    fn binding_differs_ignores_non_binding_fields() {
        let a = EndpointConfig::default();
        let mut b = a.clone();
        b.set_multicast_loopback(true);
        assert!(!a.binding_differs_from(&b));

        b.set_rx_port(9999);
        assert!(a.binding_differs_from(&b));
    }

    #[test]
    fn outgoing_interfaces_setter_reports_whether_it_changed() {
        let mut cfg = EndpointConfig::default();
        let pinned: BTreeSet<String> = ["eth0".to_string()].into_iter().collect();
        assert!(cfg.set_multicast_outgoing_interfaces(pinned.clone()));
        assert!(!cfg.set_multicast_outgoing_interfaces(pinned));
        assert!(cfg.set_multicast_outgoing_interfaces(BTreeSet::new()));
    }
}
