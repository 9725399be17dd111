//! # netudp
//!
//! A reusable UDP endpoint: unicast and multicast send/receive behind a
//! single [`Endpoint`] façade, backed by a self-healing worker that owns
//! the OS sockets, drives multicast group membership across interfaces,
//! and restarts itself after a bind or runtime failure.
//!
//! ```no_run
//! # use netudp::Endpoint;
//! # async fn demo() -> netudp::Result<()> {
//! let mut endpoint = Endpoint::new();
//! endpoint.start_with_port(11111).await?;
//! endpoint.send_to(b"hello", "127.0.0.1".parse().unwrap(), 11111, 0)?;
//! endpoint.stop().await?;
//! # Ok(())
//! # }
//! ```
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

mod command;
pub mod config;
pub mod datagram;
pub mod endpoint;
pub mod errors;
pub mod event;
mod socket;
mod worker;

pub use crate::config::EndpointConfig;
pub use crate::datagram::DatagramRecord;
pub use crate::endpoint::{Endpoint, EndpointState};
pub use crate::errors::{Error, Result};
pub use crate::event::{CounterSnapshot, EndpointEvent, EventHandler};

pub use netudp_core::pool::{DatagramPool, FreeListPool, PooledBuffer};
pub use netudp_core::prelude::{InterfaceInfo, InterfaceProvider, PnetInterfaceProvider};
