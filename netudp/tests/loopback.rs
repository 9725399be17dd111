//! S1 — unicast loopback: a datagram sent to a bound receiver's address is
//! delivered byte-identical.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use netudp::{Endpoint, EndpointEvent};
use tracing_test::traced_test;

async fn recv_datagram(endpoint: &mut Endpoint, timeout: Duration) -> EndpointEvent {
    tokio::time::timeout(timeout, async {
        loop {
            match endpoint.events().unwrap().recv().await {
                Some(event @ EndpointEvent::DatagramReceived(_)) => return event,
                Some(_) => continue,
                None => panic!("event channel closed before a datagram arrived"),
            }
        }
    })
    .await
    .expect("timed out waiting for a datagram")
}

#[tokio::test]
#[traced_test]
async fn unicast_loopback_delivers_byte_identical_payload() {
    let mut rx = Endpoint::new();
    rx.start_with_address_port(IpAddr::V4(Ipv4Addr::LOCALHOST), 18111)
        .await
        .unwrap();

    let mut tx = Endpoint::new();
    tx.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.is_bounded());
    assert!(tx.is_bounded());

    tx.send_to(
        b"My datagram packet",
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        18111,
        0,
    )
    .unwrap();

    match recv_datagram(&mut rx, Duration::from_secs(2)).await {
        EndpointEvent::DatagramReceived(datagram) => {
            assert_eq!(datagram.payload(), b"My datagram packet");
            assert_eq!(datagram.destination_port, 18111);
        }
        _ => unreachable!(),
    }

    tx.stop().await.unwrap();
    rx.stop().await.unwrap();
}

#[tokio::test]
async fn send_before_bound_is_rejected_and_stop_is_clean() {
    let mut endpoint = Endpoint::new();
    assert!(endpoint
        .send_to(b"x", IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 0)
        .is_err());

    endpoint.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(endpoint.is_bounded());
    endpoint.stop().await.unwrap();
    assert!(!endpoint.is_bounded());

    // after stop, sending is rejected again and no datagrams arrive.
    assert!(endpoint
        .send_to(b"x", IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 0)
        .is_err());
}
