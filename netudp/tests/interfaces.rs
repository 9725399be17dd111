//! S6 — interface appearance: auto-discovery joins a group on an interface
//! that only appears after the endpoint has already started.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use netudp::{Endpoint, EndpointConfig, EndpointEvent, FreeListPool};
use netudp_core::iface::InterfaceInfo;
use netudp_core::prelude::{InterfaceProvider, StaticInterfaceProvider};

fn iface(name: &str) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        is_valid: true,
        is_up: true,
        is_running: true,
        can_broadcast: true,
        can_multicast: true,
        is_loopback: false,
        is_point_to_point: false,
        index: 1,
        ipv4_addr: Some(Ipv4Addr::new(192, 168, 50, 10)),
        ipv6_addr: None,
    }
}

#[tokio::test]
async fn interface_appearing_after_start_is_auto_joined() {
    let provider = Arc::new(StaticInterfaceProvider::new(vec![iface("lo")]));
    let interfaces: Arc<dyn InterfaceProvider> = provider.clone();

    let mut config = EndpointConfig::default();
    config.rx_address = Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    config.rx_port = 19411;
    config.multicast_loopback = true;

    let mut endpoint =
        Endpoint::with_collaborators(config, interfaces, FreeListPool::new(8), None);
    endpoint.start().await.unwrap();
    endpoint.join_group("239.5.5.5".parse().unwrap()).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    // simulate eth0 appearing after start; the listening watcher is
    // interval-driven (2500ms) so give it enough time to reconcile.
    provider.set(vec![iface("lo"), iface("eth0")]);

    let mut joined_on = std::collections::BTreeSet::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(6);
    while tokio::time::Instant::now() < deadline && !joined_on.contains("eth0") {
        if let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), endpoint.events().unwrap().recv())
                .await
        {
            if let EndpointEvent::MulticastGroupJoined { interface, .. } = event {
                joined_on.insert(interface);
            }
        }
    }

    assert!(joined_on.contains("eth0"), "eth0 was never joined");

    endpoint.stop().await.unwrap();
}
