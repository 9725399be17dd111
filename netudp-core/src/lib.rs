//! # netudp-core
//!
//! Shared infrastructure for the `netudp` UDP endpoint library: network
//! interface enumeration, a recyclable datagram buffer pool, and (behind the
//! `metrics` feature) Prometheus counters. These are the "external
//! collaborators" the worker consumes through traits rather than owning
//! directly, each shipped here with one concrete, dependency-light
//! implementation so the crate is usable standalone.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use pnet;

pub mod iface;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pool;
pub mod prelude;
