//! Send a single unicast datagram to a receiving endpoint on the same host.
//!
//! ```text
//! cargo run -p netudp --example simple -- 11111
//! ```
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use netudp::Endpoint;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(11111);

    let mut rx = Endpoint::new();
    rx.start_with_address_port(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
        .await
        .expect("rx endpoint failed to start");

    let mut tx = Endpoint::new();
    tx.start().await.expect("tx endpoint failed to start");

    tx.send_to(b"hello from netudp", IpAddr::V4(Ipv4Addr::LOCALHOST), port, 0)
        .expect("send failed");

    match tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(event) = rx.events().expect("rx has no event channel").recv().await {
                if let netudp::EndpointEvent::DatagramReceived(datagram) = event {
                    return String::from_utf8_lossy(datagram.payload()).into_owned();
                }
            }
        }
    })
    .await
    {
        Ok(payload) => info!(%payload, "received datagram"),
        Err(_) => error!("timed out waiting for a datagram"),
    }

    tx.stop().await.ok();
    rx.stop().await.ok();
}
