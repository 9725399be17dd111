//! netudp-core prelude

pub use crate::iface::{InterfaceInfo, InterfaceProvider, PnetInterfaceProvider, StaticInterfaceProvider};
pub use crate::pool::{DatagramPool, FreeListPool, PooledBuffer};

pub use std::sync::Arc;
