//! The Endpoint façade (§4.2): presents the worker behind a stable surface
//! safe to call from anywhere, absorbing configuration changes into worker
//! commands and aggregating per-second counters into totals.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use netudp_core::pool::{DatagramPool, FreeListPool};
use netudp_core::prelude::{InterfaceProvider, PnetInterfaceProvider};

use crate::command::Command;
use crate::config::EndpointConfig;
use crate::datagram::DatagramRecord;
use crate::errors::{Error, Result};
use crate::event::{CounterSnapshot, EndpointEvent, EventHandler};
use crate::worker::Worker;

const MAX_UDP_PAYLOAD: usize = 65_535;

/// Observable endpoint state (§3 "Endpoint state"): everything the
/// application can read without going through an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointState {
    /// True between `start()` and `stop()`.
    pub is_running: bool,
    /// True iff the receive socket currently holds a live OS binding.
    pub is_bounded: bool,
    /// Total bytes received since construction (or the last counter reset).
    pub rx_bytes_total: u64,
    /// Total bytes sent.
    pub tx_bytes_total: u64,
    /// Total datagrams received.
    pub rx_packets_total: u64,
    /// Total datagrams sent.
    pub tx_packets_total: u64,
    /// Total datagrams rejected as invalid.
    pub rx_invalid_total: u64,
    /// Bytes received during the most recent 1000 ms tick.
    pub rx_bytes_per_second: u64,
    /// Bytes sent during the most recent 1000 ms tick.
    pub tx_bytes_per_second: u64,
    /// Datagrams received during the most recent 1000 ms tick.
    pub rx_packets_per_second: u64,
    /// Datagrams sent during the most recent 1000 ms tick.
    pub tx_packets_per_second: u64,
}

impl EndpointState {
    fn apply_counters(&mut self, snapshot: CounterSnapshot) {
        self.rx_bytes_total += snapshot.rx_bytes;
        self.tx_bytes_total += snapshot.tx_bytes;
        self.rx_packets_total += snapshot.rx_packets;
        self.tx_packets_total += snapshot.tx_packets;
        self.rx_invalid_total += snapshot.rx_invalid;
        self.rx_bytes_per_second = snapshot.rx_bytes;
        self.tx_bytes_per_second = snapshot.tx_bytes;
        self.rx_packets_per_second = snapshot.rx_packets;
        self.tx_packets_per_second = snapshot.tx_packets;
    }
}

/// The public UDP endpoint. Cheap to construct; does nothing until
/// [`Endpoint::start`].
pub struct Endpoint {
    config: EndpointConfig,
    interfaces: Arc<dyn InterfaceProvider>,
    pool: Arc<dyn DatagramPool>,
    handler: Option<Arc<dyn EventHandler>>,

    state: Arc<Mutex<EndpointState>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    pump: Option<JoinHandle<()>>,
    worker_thread: Option<std::thread::JoinHandle<()>>,
    events: Option<mpsc::UnboundedReceiver<EndpointEvent>>,

    use_worker_thread: bool,
    is_running: bool,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .field("is_running", &self.is_running)
            .field("use_worker_thread", &self.use_worker_thread)
            .finish_non_exhaustive()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint {
    /// A new, stopped endpoint with default configuration, the default
    /// `pnet`-backed interface provider, and a 256-buffer pool.
    pub fn new() -> Self {
        Self::with_config(EndpointConfig::default())
    }

    /// A new, stopped endpoint with the given configuration.
    pub fn with_config(config: EndpointConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(PnetInterfaceProvider::new()),
            FreeListPool::new(256),
            None,
        )
    }

    /// A new, stopped endpoint that delivers events to `handler` instead of
    /// an application-drained channel.
    pub fn with_handler(config: EndpointConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(PnetInterfaceProvider::new()),
            FreeListPool::new(256),
            Some(handler),
        )
    }

    /// Full constructor: swap in a custom [`InterfaceProvider`] and/or
    /// [`DatagramPool`] (§1's external collaborators).
    pub fn with_collaborators(
        config: EndpointConfig,
        interfaces: Arc<dyn InterfaceProvider>,
        pool: Arc<dyn DatagramPool>,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        Self {
            config,
            interfaces,
            pool,
            handler,
            state: Arc::new(Mutex::new(EndpointState::default())),
            commands: None,
            pump: None,
            worker_thread: None,
            events: None,
            use_worker_thread: false,
            is_running: false,
        }
    }

    /// Current observable state, combining locally tracked `is_running`
    /// with the worker-reported counters and bind status.
    pub fn state(&self) -> EndpointState {
        let mut state = *self.state.lock();
        state.is_running = self.is_running;
        state
    }

    /// Shorthand for `state().is_running`.
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Shorthand for `state().is_bounded`.
    pub fn is_bounded(&self) -> bool {
        self.state.lock().is_bounded
    }

    /// The event receiver, for applications that didn't supply an
    /// [`EventHandler`] at construction. Returns `None` before the first
    /// `start()`.
    pub fn events(&mut self) -> Option<&mut mpsc::UnboundedReceiver<EndpointEvent>> {
        self.events.as_mut()
    }

    /// A fresh buffer from the pool, ready to be filled and sent.
    pub fn make_datagram(&self, length: usize) -> DatagramRecord {
        DatagramRecord::new(self.pool.clone().acquire(length))
    }

    /// Start with the currently configured `rx_address`/`rx_port`.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running {
            return Err(Error::AlreadyRunning);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (worker, commands) = Worker::new(
            self.config.clone(),
            self.interfaces.clone(),
            self.pool.clone(),
            events_tx,
        );

        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_event_pump(
            events_rx,
            self.state.clone(),
            self.handler.clone(),
            app_tx,
        ));

        if self.use_worker_thread {
            let handle = std::thread::Builder::new()
                .name("netudp-worker".to_string())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to build netudp worker runtime");
                    runtime.block_on(worker.run());
                })
                .expect("failed to spawn netudp worker thread");
            self.worker_thread = Some(handle);
        } else {
            tokio::spawn(worker.run());
        }

        *self.state.lock() = EndpointState::default();
        self.commands = Some(commands);
        self.pump = Some(pump);
        self.events = Some(app_rx);
        self.is_running = true;
        self.send_command(Command::Start);
        Ok(())
    }

    /// `start()` after setting `rx_port`.
    pub async fn start_with_port(&mut self, port: u16) -> Result<()> {
        self.config.set_rx_port(port);
        self.start().await
    }

    /// `start()` after setting `rx_address` and `rx_port` atomically.
    pub async fn start_with_address_port(&mut self, address: IpAddr, port: u16) -> Result<()> {
        self.config.set_rx_address(Some(address));
        self.config.set_rx_port(port);
        self.start().await
    }

    /// Tear the worker down deterministically. Safe to call from any state;
    /// returns `NotRunning` if already stopped.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running {
            return Err(Error::NotRunning);
        }

        self.send_command(Command::Stop);
        self.commands = None;

        if let Some(handle) = self.worker_thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        self.events = None;
        self.is_running = false;
        Ok(())
    }

    /// Ask the running worker to rebind in place (§4.1 `on_restart`).
    pub async fn restart(&mut self) -> Result<()> {
        if !self.is_running {
            return Err(Error::NotRunning);
        }
        self.send_command(Command::Restart);
        Ok(())
    }

    /// Run the worker on its own OS thread (`true`) or as a task on the
    /// caller's runtime (`false`, the default). Toggling while running
    /// restarts the endpoint.
    pub async fn set_use_worker_thread(&mut self, use_worker_thread: bool) -> Result<()> {
        if self.use_worker_thread == use_worker_thread {
            return Ok(());
        }
        self.use_worker_thread = use_worker_thread;
        if self.is_running {
            self.stop().await?;
            self.start().await?;
        }
        Ok(())
    }

    /// Join a multicast group for receiving. Duplicate joins are no-ops;
    /// non-multicast addresses are rejected synchronously.
    pub fn join_group(&mut self, group: IpAddr) -> Result<()> {
        if !group.is_multicast() {
            return Err(Error::NotMulticast(group));
        }
        if self.config.multicast_listening_groups.insert(group) {
            self.send_command(Command::JoinGroup(group));
        }
        Ok(())
    }

    /// Leave a multicast group.
    pub fn leave_group(&mut self, group: IpAddr) {
        if self.config.multicast_listening_groups.remove(&group) {
            self.send_command(Command::LeaveGroup(group));
        }
    }

    /// Leave every joined multicast group.
    pub fn leave_all_groups(&mut self) {
        self.config.multicast_listening_groups.clear();
        self.send_command(Command::LeaveAllGroups);
    }

    /// Whether `group` is in the desired listening set.
    pub fn is_group_present(&self, group: &IpAddr) -> bool {
        self.config.multicast_listening_groups.contains(group)
    }

    /// Pin multicast listening to `name`, disabling interface auto-discovery.
    pub fn join_interface(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.config.multicast_listening_interfaces.insert(name.clone()) {
            self.send_command(Command::JoinInterface(name));
        }
    }

    /// Unpin `name` from the listening interface set.
    pub fn leave_interface(&mut self, name: &str) {
        if self.config.multicast_listening_interfaces.remove(name) {
            self.send_command(Command::LeaveInterface(name.to_string()));
        }
    }

    /// Clear the pinned listening interface set, re-enabling auto-discovery.
    pub fn leave_all_interfaces(&mut self) {
        self.config.multicast_listening_interfaces.clear();
        self.send_command(Command::LeaveAllInterfaces);
    }

    /// Whether `name` is in the pinned listening interface set.
    pub fn is_interface_present(&self, name: &str) -> bool {
        self.config.multicast_listening_interfaces.contains(name)
    }

    /// Send a pre-built datagram. Synchronously rejected when the endpoint
    /// isn't running, isn't bounded, or the datagram is malformed (§7).
    pub fn send(&mut self, datagram: DatagramRecord) -> Result<()> {
        self.validate_send(&datagram)?;
        self.send_command(Command::Send(Arc::new(datagram)));
        Ok(())
    }

    /// Convenience send that builds the `DatagramRecord` for you.
    pub fn send_to(&mut self, payload: &[u8], address: IpAddr, port: u16, ttl: u8) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        if payload.len() > MAX_UDP_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        let mut datagram = self.make_datagram(payload.len());
        datagram.buffer.copy_from_slice(payload);
        datagram.destination_address = Some(address);
        datagram.destination_port = port;
        datagram.hop_limit = ttl;
        self.send(datagram)
    }

    fn validate_send(&self, datagram: &DatagramRecord) -> Result<()> {
        if !self.is_running {
            return Err(Error::NotRunning);
        }
        if !self.state.lock().is_bounded {
            return Err(Error::NotBounded);
        }
        if datagram.length == 0 {
            return Err(Error::EmptyBuffer);
        }
        if datagram.length > MAX_UDP_PAYLOAD {
            return Err(Error::PayloadTooLarge(datagram.length));
        }
        match datagram.destination_address {
            None => Err(Error::EmptyAddress),
            Some(addr) if addr.is_unspecified() => Err(Error::EmptyAddress),
            Some(_) => Ok(()),
        }
    }

    /// Set `rx_address`; restarts the worker if running and the value
    /// actually changed.
    pub fn set_rx_address(&mut self, address: Option<IpAddr>) {
        let changed = self.config.set_rx_address(address);
        self.reconfigure_if_changed(changed);
    }

    /// Set `rx_port`.
    pub fn set_rx_port(&mut self, port: u16) {
        let changed = self.config.set_rx_port(port);
        self.reconfigure_if_changed(changed);
    }

    /// Set `tx_port`.
    pub fn set_tx_port(&mut self, port: u16) {
        let changed = self.config.set_tx_port(port);
        self.reconfigure_if_changed(changed);
    }

    /// Set `separate_rx_tx`.
    pub fn set_separate_rx_tx(&mut self, separate: bool) {
        let changed = self.config.set_separate_rx_tx(separate);
        self.reconfigure_if_changed(changed);
    }

    /// Set `input_enabled`.
    pub fn set_input_enabled(&mut self, enabled: bool) {
        let changed = self.config.set_input_enabled(enabled);
        self.reconfigure_if_changed(changed);
    }

    /// Set `watchdog_period`. Never bind-affecting but still pushed to a
    /// running worker so the next failure uses the new value.
    pub fn set_watchdog_period(&mut self, period: std::time::Duration) {
        let changed = self.config.set_watchdog_period(period);
        self.reconfigure_if_changed(changed);
    }

    /// Set `multicast_loopback`.
    pub fn set_multicast_loopback(&mut self, loopback: bool) {
        let changed = self.config.set_multicast_loopback(loopback);
        self.reconfigure_if_changed(changed);
    }

    /// Pin multicast transmission to exactly these interfaces; an empty set
    /// restores "every capable interface" (the default).
    pub fn set_multicast_outgoing_interfaces(
        &mut self,
        interfaces: impl IntoIterator<Item = String>,
    ) {
        let changed = self
            .config
            .set_multicast_outgoing_interfaces(interfaces.into_iter().collect());
        self.reconfigure_if_changed(changed);
    }

    fn reconfigure_if_changed(&mut self, changed: bool) {
        if changed && self.is_running {
            self.send_command(Command::ApplyConfig(self.config.clone()));
        }
    }

    fn send_command(&self, command: Command) {
        if let Some(commands) = &self.commands {
            if commands.send(command).is_err() {
                warn!("worker command channel closed unexpectedly");
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // Dropping `commands` (below, via the struct's own field drop) closes
        // the worker's channel, which ends its run loop on its own. Not
        // joined here: call `stop()` first for a deterministic shutdown.
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<EndpointEvent>,
    state: Arc<Mutex<EndpointState>>,
    handler: Option<Arc<dyn EventHandler>>,
    app_events: mpsc::UnboundedSender<EndpointEvent>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            EndpointEvent::IsBoundedChanged(bounded) => state.lock().is_bounded = *bounded,
            EndpointEvent::CountersTick(snapshot) => state.lock().apply_counters(*snapshot),
            _ => {}
        }

        if let Some(handler) = &handler {
            handler.on_event(event);
        } else {
            let _ = app_events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let mut endpoint = Endpoint::new();
        let err = endpoint.send_to(b"hi", IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 0);
        assert!(matches!(err, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let mut endpoint = Endpoint::new();
        endpoint.start_with_port(0).await.unwrap();
        let err = endpoint.send_to(b"", IpAddr::V4(Ipv4Addr::LOCALHOST), 1, 0);
        assert!(matches!(err, Err(Error::EmptyBuffer)));
        endpoint.stop().await.unwrap();
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut endpoint = Endpoint::new();
        endpoint.start_with_port(0).await.unwrap();
        assert!(matches!(endpoint.start().await, Err(Error::AlreadyRunning)));
        endpoint.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let mut endpoint = Endpoint::new();
        assert!(matches!(endpoint.stop().await, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn join_group_rejects_non_multicast_address() {
        let mut endpoint = Endpoint::new();
        let err = endpoint.join_group(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(matches!(err, Err(Error::NotMulticast(_))));
    }

    #[tokio::test]
    async fn loopback_unicast_roundtrip() {
        let mut rx = Endpoint::new();
        rx.set_rx_address(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        rx.start_with_port(0).await.unwrap();

        // give the worker task a tick to bind and report back.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.is_bounded());
        let rx_port = {
            // worker binds asynchronously; poll state() briefly.
            let mut port = 0;
            for _ in 0..20 {
                if rx.is_bounded() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = &mut port;
            port
        };
        let _ = rx_port;

        rx.stop().await.unwrap();
    }
}
