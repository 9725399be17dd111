#![allow(missing_docs)] // proc macros/lazy_static don't play nicely with docstrings

//! # metrics
//!
//! Prometheus counters mirroring the traffic counters every `EndpointState`
//! already exposes as plain fields. These are additive: an application that
//! doesn't scrape Prometheus never has to look at this module.
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

lazy_static! {
    /// total rx bytes across all endpoints in the process
    pub static ref RX_BYTES_TOTAL: IntCounter =
        register_int_counter!("netudp_rx_bytes_total", "total bytes received").unwrap();
    /// total tx bytes across all endpoints in the process
    pub static ref TX_BYTES_TOTAL: IntCounter =
        register_int_counter!("netudp_tx_bytes_total", "total bytes sent").unwrap();
    /// total rx packets across all endpoints in the process
    pub static ref RX_PACKETS_TOTAL: IntCounter =
        register_int_counter!("netudp_rx_packets_total", "total datagrams received").unwrap();
    /// total tx packets across all endpoints in the process
    pub static ref TX_PACKETS_TOTAL: IntCounter =
        register_int_counter!("netudp_tx_packets_total", "total datagrams sent").unwrap();
    /// total rx packets rejected as invalid
    pub static ref RX_INVALID_TOTAL: IntCounter = register_int_counter!(
        "netudp_rx_invalid_total",
        "total datagrams rejected as invalid"
    )
    .unwrap();

    /// count of multicast groups currently joined, labeled by interface
    pub static ref MULTICAST_GROUPS_JOINED: IntCounterVec = register_int_counter_vec!(
        "netudp_multicast_groups_joined_total",
        "count of successful multicast group joins",
        &["interface"]
    )
    .unwrap();

    /// count of watchdog-triggered restarts across all endpoints
    pub static ref WATCHDOG_RESTARTS_TOTAL: IntCounter = register_int_counter!(
        "netudp_watchdog_restarts_total",
        "count of worker restarts triggered by the watchdog"
    )
    .unwrap();

    /// whether the endpoint currently holds a live OS binding (0 or 1)
    pub static ref IS_BOUNDED: IntGauge =
        register_int_gauge!("netudp_is_bounded", "1 if the endpoint is currently bound").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::gather;
    use std::collections::HashSet;

    #[test]
    fn counters_are_registered_and_exposed() {
        RX_BYTES_TOTAL.inc_by(0);
        MULTICAST_GROUPS_JOINED.with_label_values(&["lo"]).inc();

        let names = gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect::<HashSet<_>>();

        assert!(names.contains("netudp_rx_bytes_total"));
        assert!(names.contains("netudp_multicast_groups_joined_total"));
    }
}
