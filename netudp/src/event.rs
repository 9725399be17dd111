//! Worker → Endpoint events (§5, §6).
//!
//! Replaces the source's Qt signals with a queued channel: the worker
//! pushes events, the endpoint forwards them to an application-supplied
//! [`EventHandler`] or a channel the application drains itself.

use std::sync::Arc;

use crate::datagram::DatagramRecord;

/// An event emitted by the worker, in FIFO order with respect to other
/// events but with no ordering guarantee relative to commands the endpoint
/// sent concurrently.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    /// `is_bounded` transitioned.
    IsBoundedChanged(bool),
    /// A structural or bind socket error occurred; `code` is the OS error
    /// code when available.
    SocketError {
        /// Raw OS error code, if the error originated from one.
        code: Option<i32>,
        /// Human-readable description.
        description: String,
    },
    /// A multicast group was successfully joined on an interface.
    MulticastGroupJoined {
        /// The group address.
        group: std::net::IpAddr,
        /// The interface name.
        interface: String,
    },
    /// A multicast group was left (explicitly, or because its interface
    /// disappeared).
    MulticastGroupLeft {
        /// The group address.
        group: std::net::IpAddr,
        /// The interface name.
        interface: String,
    },
    /// A datagram arrived.
    DatagramReceived(Arc<DatagramRecord>),
    /// Counters observed since the previous tick (§4.1's "Counters").
    CountersTick(CounterSnapshot),
}

/// Deltas observed over the last 1000 ms counter interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Bytes received since the last tick.
    pub rx_bytes: u64,
    /// Bytes sent since the last tick.
    pub tx_bytes: u64,
    /// Datagrams received since the last tick.
    pub rx_packets: u64,
    /// Datagrams sent since the last tick.
    pub tx_packets: u64,
    /// Datagrams rejected as invalid since the last tick.
    pub rx_invalid: u64,
}

/// Callback interface an application can provide at construction instead of
/// draining an event channel by hand.
pub trait EventHandler: Send + Sync {
    /// Called for every event the worker emits.
    fn on_event(&self, event: EndpointEvent);
}

impl<F> EventHandler for F
where
    F: Fn(EndpointEvent) + Send + Sync,
{
    fn on_event(&self, event: EndpointEvent) {
        self(event)
    }
}
