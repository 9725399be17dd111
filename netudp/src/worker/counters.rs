//! Traffic counters (§4.1 "Counters"): accumulated since the last 1000 ms
//! tick, then drained into an [`EndpointEvent::CountersTick`].

use super::Worker;
use crate::event::{CounterSnapshot, EndpointEvent};

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Counters {
    rx_bytes: u64,
    tx_bytes: u64,
    rx_packets: u64,
    tx_packets: u64,
    rx_invalid: u64,
}

impl Counters {
    pub(super) fn record_rx(&mut self, bytes: usize) {
        self.rx_bytes += bytes as u64;
        self.rx_packets += 1;
    }

    pub(super) fn record_tx(&mut self, bytes: usize) {
        self.tx_bytes += bytes as u64;
        self.tx_packets += 1;
    }

    pub(super) fn record_rx_invalid(&mut self) {
        self.rx_invalid += 1;
    }

    fn take(&mut self) -> CounterSnapshot {
        let snapshot = CounterSnapshot {
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
            rx_packets: self.rx_packets,
            tx_packets: self.tx_packets,
            rx_invalid: self.rx_invalid,
        };
        *self = Counters::default();
        snapshot
    }
}

impl Worker {
    pub(super) fn tick_counters(&mut self) {
        let snapshot = self.counters.take();

        #[cfg(feature = "metrics")]
        {
            netudp_core::metrics::RX_BYTES_TOTAL.inc_by(snapshot.rx_bytes);
            netudp_core::metrics::TX_BYTES_TOTAL.inc_by(snapshot.tx_bytes);
            netudp_core::metrics::RX_PACKETS_TOTAL.inc_by(snapshot.rx_packets);
            netudp_core::metrics::TX_PACKETS_TOTAL.inc_by(snapshot.tx_packets);
            netudp_core::metrics::RX_INVALID_TOTAL.inc_by(snapshot.rx_invalid);
        }

        let _ = self.events.send(EndpointEvent::CountersTick(snapshot));
        self.counter_next = Some(tokio::time::Instant::now() + crate::config::COUNTER_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_and_returns_accumulated_values() {
        let mut counters = Counters::default();
        counters.record_rx(10);
        counters.record_rx(5);
        counters.record_tx(3);
        counters.record_rx_invalid();

        let snapshot = counters.take();
        assert_eq!(snapshot.rx_bytes, 15);
        assert_eq!(snapshot.rx_packets, 2);
        assert_eq!(snapshot.tx_bytes, 3);
        assert_eq!(snapshot.rx_invalid, 1);

        let empty = counters.take();
        assert_eq!(empty, CounterSnapshot::default());
    }
}
