//! The receive loop (§4.1 "Receive loop").

use std::io;

use tracing::{trace, warn};

use crate::datagram::DatagramRecord;
use crate::event::EndpointEvent;
use crate::socket::Socket;

use super::Worker;

const MAX_UDP_PAYLOAD: usize = 65_535;

/// Waits for `socket` to become readable, or never resolves if `want` is
/// false (input disabled, or not yet bounded) — lets the main `select!`
/// loop simply not poll for reads in that case.
pub(super) async fn readable(socket: Option<&Socket>, want: bool) -> io::Result<()> {
    match (socket, want) {
        (Some(socket), true) => socket.readable().await,
        _ => std::future::pending().await,
    }
}

impl Worker {
    /// Drain every datagram currently queued on the rx socket without
    /// blocking, per §4.1's step-by-step receive algorithm.
    pub(super) async fn drain_rx(&mut self) {
        loop {
            let socket = match self.rx_socket.as_ref().or(self.tx_socket.as_ref()) {
                Some(socket) => socket,
                None => return,
            };

            let mut scratch = [0u8; MAX_UDP_PAYLOAD];
            match socket.try_recv_from(&mut scratch) {
                Ok(None) => return,
                Ok(Some((0, from, _))) => {
                    // A zero-length datagram: consume it and move on rather than
                    // let the OS redeliver the same "ICMP unreachable" forever.
                    trace!(%from, "ignoring zero-length datagram");
                    self.counters.record_rx_invalid();
                }
                Ok(Some((len, _from, _))) if len > MAX_UDP_PAYLOAD => {
                    warn!(len, "oversized datagram, discarding");
                    self.counters.record_rx_invalid();
                }
                Ok(Some((len, from, hop_limit))) => {
                    let mut buffer = self.pool.clone().acquire(len);
                    buffer.copy_from_slice(&scratch[..len]);
                    let mut record = DatagramRecord::new(buffer);
                    record.source_address = Some(from.ip());
                    record.source_port = from.port();
                    record.hop_limit = hop_limit;
                    if let Ok(local) = socket.local_addr() {
                        record.destination_address = Some(local.ip());
                        record.destination_port = local.port();
                    }
                    self.counters.record_rx(len);
                    let _ = self
                        .events
                        .send(EndpointEvent::DatagramReceived(std::sync::Arc::new(record)));
                }
                Err(err) => {
                    self.on_runtime_error(err).await;
                    return;
                }
            }
        }
    }
}
