//! Endpoint → Worker commands (§5).
//!
//! Every Worker mutation happens in response to one of these, processed in
//! FIFO order on the worker's single execution context. Reconfiguration
//! variants that affect binding are resolved into a stop+start sequence by
//! the worker itself (`Worker::apply_config`), not by the endpoint.

use std::net::IpAddr;
use std::sync::Arc;

use crate::config::EndpointConfig;
use crate::datagram::DatagramRecord;

/// A command sent from an `Endpoint` to its `Worker`.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Restart,
    ApplyConfig(EndpointConfig),
    JoinGroup(IpAddr),
    LeaveGroup(IpAddr),
    LeaveAllGroups,
    JoinInterface(String),
    LeaveInterface(String),
    LeaveAllInterfaces,
    Send(Arc<DatagramRecord>),
}
