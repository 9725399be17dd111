//! Error taxonomy (§7).
//!
//! Invalid-argument errors are returned synchronously to the caller and
//! never change worker state. Bind and structural runtime failures instead
//! surface as an [`crate::event::EndpointEvent::SocketError`] event and
//! schedule a watchdog restart; they are not represented here because the
//! caller who triggered them (a background timer, a socket readiness poll)
//! has no one to return a `Result` to.

/// Synchronous errors returned directly from `Endpoint`/`Worker` calls.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `start()` called while the worker already owns a tx socket.
    #[error("worker is already running")]
    AlreadyRunning,
    /// `stop()`/send/reconfigure called while the worker has no tx socket.
    #[error("worker is not running")]
    NotRunning,
    /// `send()` called before the worker reached the `Bound` state.
    #[error("endpoint is not bounded")]
    NotBounded,
    /// an empty buffer was passed to `send()`.
    #[error("cannot send an empty datagram")]
    EmptyBuffer,
    /// a datagram longer than 65535 bytes was passed to `send()`.
    #[error("datagram of {0} bytes exceeds the 65535 byte UDP payload limit")]
    PayloadTooLarge(usize),
    /// an empty destination address was passed to `send()`.
    #[error("destination address is empty")]
    EmptyAddress,
    /// `join_group`/`leave_group` called with a non-multicast address.
    #[error("{0} is not a multicast address")]
    NotMulticast(std::net::IpAddr),
    /// the underlying OS call failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for fallible synchronous `netudp` operations.
pub type Result<T> = std::result::Result<T, Error>;
