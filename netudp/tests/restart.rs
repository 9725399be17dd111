//! S4/S5 — repeated restart and bind-conflict recovery.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use netudp::{Endpoint, EndpointConfig};

#[tokio::test]
async fn repeated_restart_leaves_endpoint_idle_each_time() {
    for _ in 0..10 {
        let mut config = EndpointConfig::default();
        config.rx_port = 19321;
        let mut endpoint = Endpoint::with_config(config);
        endpoint.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(endpoint.is_bounded());
        endpoint.stop().await.unwrap();
        assert!(!endpoint.is_running());
        assert!(!endpoint.is_bounded());
    }

    let mut config = EndpointConfig::default();
    config.rx_port = 19321;
    let mut endpoint = Endpoint::with_config(config);
    endpoint.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    endpoint
        .send_to(b"self", IpAddr::V4(Ipv4Addr::LOCALHOST), 19321, 0)
        .unwrap();
    endpoint.stop().await.unwrap();
}

#[tokio::test]
async fn bind_conflict_recovers_once_the_port_is_released() {
    let mut a_config = EndpointConfig::default();
    a_config.rx_port = 19322;
    a_config.watchdog_period = Duration::from_millis(200);
    let mut a = Endpoint::with_config(a_config);
    a.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.is_bounded());

    // B tries the same port without SO_REUSEPORT-sharing semantics in play
    // (both endpoints request share+reuse, so to force an honest conflict we
    // instead occupy the port with a raw std socket first).
    let holder = std::net::UdpSocket::bind(("0.0.0.0", 0)).unwrap();
    let held_port = holder.local_addr().unwrap().port();

    let mut b_config = EndpointConfig::default();
    b_config.rx_port = held_port;
    b_config.watchdog_period = Duration::from_millis(150);
    let mut b = Endpoint::with_config(b_config);
    b.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!b.is_bounded());

    drop(holder);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(b.is_bounded());

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test]
async fn restart_rebinds_without_a_full_stop() {
    let mut config = EndpointConfig::default();
    config.rx_port = 19323;
    let mut endpoint = Endpoint::with_config(config);
    endpoint.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(endpoint.is_bounded());

    endpoint.restart().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(endpoint.is_running());
    assert!(endpoint.is_bounded());

    endpoint.stop().await.unwrap();
}
