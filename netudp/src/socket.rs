//! Thin async wrapper over a `socket2`-configured UDP socket.
//!
//! Sockets are built with `socket2::Socket` (for the options the `std`/
//! `tokio` socket types don't expose: `SO_REUSEADDR`+`SO_REUSEPORT`,
//! per-interface `IP_MULTICAST_IF`) and converted into a `tokio::net::
//! UdpSocket` for async send/recv. UDP has a direct `std::net::UdpSocket`
//! counterpart, so the conversion goes through `socket2`'s native `From` impl
//! rather than a raw-fd dance.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;

/// Control-message buffer large enough for one `IP_TTL`/`IPV6_HOPLIMIT`
/// ancillary record plus its `cmsghdr`.
const CMSG_BUF_LEN: usize = 64;

/// An async UDP socket plus the `socket2` options this crate needs that
/// aren't exposed on `tokio::net::UdpSocket` directly.
#[derive(Debug)]
pub(crate) struct Socket {
    inner: UdpSocket,
}

impl Socket {
    /// Build an unbound, non-blocking socket for `domain`, with
    /// `SO_REUSEADDR`/`SO_REUSEPORT` set so multiple endpoints can share a
    /// bind address ("ShareAddress + ReuseAddressHint").
    fn new_raw(domain: Domain) -> io::Result<socket2::Socket> {
        let socket = socket2::Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;
        enable_recv_hop_limit(socket.as_raw_fd(), domain)?;
        Ok(socket)
    }

    /// Create and bind a socket to `addr`.
    pub(crate) fn bind(addr: SocketAddr) -> io::Result<Self> {
        let domain = Domain::for_address(addr);
        let raw = Self::new_raw(domain)?;
        raw.bind(&addr.into())?;
        let std_socket: std::net::UdpSocket = raw.into();
        Ok(Self {
            inner: UdpSocket::from_std(std_socket)?,
        })
    }

    /// Create a socket bound to an ephemeral port on `domain`'s ANY
    /// address, used for per-interface multicast transmission.
    pub(crate) fn bind_any(domain: Domain) -> io::Result<Self> {
        let addr: SocketAddr = if domain == Domain::IPV6 {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        Self::bind(addr)
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub(crate) async fn readable(&self) -> io::Result<()> {
        self.inner.readable().await
    }

    /// Try to receive one datagram without blocking. `Ok(None)` means no
    /// datagram was pending (a spurious wakeup); `Ok(Some((0, addr, _)))`
    /// surfaces the zero-length-datagram case the recv loop needs to
    /// special-case (§4.1.6 step 1). The hop limit is read via `recvmsg`
    /// ancillary data and is `0` when the OS didn't attach any.
    pub(crate) fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr, u8)>> {
        match recv_with_hop_limit(self.inner.as_raw_fd(), buf) {
            Ok(triple) => Ok(Some(triple)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, target).await
    }

    pub(crate) fn set_multicast_loopback(&self, enabled: bool, domain: Domain) -> io::Result<()> {
        let sock = socket2::SockRef::from(&self.inner);
        if domain == Domain::IPV6 {
            sock.set_multicast_loop_v6(enabled)
        } else {
            sock.set_multicast_loop_v4(enabled)
        }
    }

    pub(crate) fn set_multicast_ttl(&self, ttl: u32, domain: Domain) -> io::Result<()> {
        let sock = socket2::SockRef::from(&self.inner);
        if domain == Domain::IPV6 {
            sock.set_multicast_hops_v6(ttl)
        } else {
            sock.set_multicast_ttl_v4(ttl)
        }
    }

    pub(crate) fn set_unicast_ttl(&self, ttl: u32) -> io::Result<()> {
        socket2::SockRef::from(&self.inner).set_ttl(ttl)
    }

    /// Pin this socket's multicast egress to a specific interface, ahead of
    /// creating one tx socket per outgoing interface (§4.1.4).
    pub(crate) fn set_multicast_interface_v4(&self, iface: Ipv4Addr) -> io::Result<()> {
        socket2::SockRef::from(&self.inner).set_multicast_if_v4(&iface)
    }

    pub(crate) fn set_multicast_interface_v6(&self, index: u32) -> io::Result<()> {
        socket2::SockRef::from(&self.inner).set_multicast_if_v6(index)
    }

    /// Join a multicast group on the interface identified by `iface_v4`
    /// (IPv4) or `iface_index` (IPv6, where membership is addressed by
    /// interface index rather than local address).
    pub(crate) fn join_multicast(
        &self,
        group: IpAddr,
        iface_v4: Option<Ipv4Addr>,
        iface_index: u32,
    ) -> io::Result<()> {
        let sock = socket2::SockRef::from(&self.inner);
        match group {
            IpAddr::V4(group) => {
                let iface = iface_v4.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "interface has no IPv4 address to join an IPv4 group on",
                    )
                })?;
                sock.join_multicast_v4(&group, &iface)
            }
            IpAddr::V6(group) => sock.join_multicast_v6(&group, iface_index),
        }
    }

    pub(crate) fn leave_multicast(
        &self,
        group: IpAddr,
        iface_v4: Option<Ipv4Addr>,
        iface_index: u32,
    ) -> io::Result<()> {
        let sock = socket2::SockRef::from(&self.inner);
        match group {
            IpAddr::V4(group) => {
                let iface = iface_v4.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "interface has no IPv4 address to leave an IPv4 group on",
                    )
                })?;
                sock.leave_multicast_v4(&group, &iface)
            }
            IpAddr::V6(group) => sock.leave_multicast_v6(&group, iface_index),
        }
    }
}

/// Ask the kernel to attach the IP hop limit as ancillary data on every
/// datagram this socket receives (§4.1 "Receive loop" step 3, §6).
fn enable_recv_hop_limit(fd: RawFd, domain: Domain) -> io::Result<()> {
    let enable: libc::c_int = 1;
    let (level, name) = if domain == Domain::IPV6 {
        (libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT)
    } else {
        (libc::IPPROTO_IP, libc::IP_RECVTTL)
    };
    // SAFETY: fd is a freshly created, open socket; `enable` is a live i32
    // on the stack for the duration of the call.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Receive one datagram via `recvmsg`, reading the hop limit out of
/// `IP_TTL`/`IPV6_HOPLIMIT` ancillary data when `enable_recv_hop_limit` set
/// it up. Returns `(length, source, hop_limit)`; `hop_limit` is `0` when the
/// OS attached none.
fn recv_with_hop_limit(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, u8)> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut cmsg_buf = [0u8; CMSG_BUF_LEN];
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut storage as *mut _ as *mut libc::c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov as *mut libc::iovec;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    // SAFETY: `fd` is a valid, non-blocking datagram socket; `msg` points at
    // stack buffers (one iovec, `CMSG_BUF_LEN` bytes of control space) that
    // outlive the call.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let source = sockaddr_storage_to_socket_addr(storage, msg.msg_namelen)?;
    // SAFETY: `msg` was just populated by the `recvmsg` call above.
    let hop_limit = unsafe { hop_limit_from_cmsg(&msg) };
    Ok((n as usize, source, hop_limit))
}

/// Walk the control messages recvmsg attached, looking for the hop limit.
///
/// # Safety
/// `msg` must have just been filled in by a successful `recvmsg` call.
unsafe fn hop_limit_from_cmsg(msg: &libc::msghdr) -> u8 {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let hdr = &*cmsg;
        let is_ttl = hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_TTL;
        let is_hop_limit =
            hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == libc::IPV6_HOPLIMIT;
        if is_ttl || is_hop_limit {
            let data = libc::CMSG_DATA(cmsg) as *const libc::c_int;
            return std::ptr::read_unaligned(data) as u8;
        }
        cmsg = libc::CMSG_NXTHDR(msg, cmsg);
    }
    0
}

fn sockaddr_storage_to_socket_addr(
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
) -> io::Result<SocketAddr> {
    // SAFETY: `storage` was filled in by `recvmsg` above with the matching
    // `len`, which is exactly what `SockAddr::new` requires of its caller.
    let addr = unsafe { socket2::SockAddr::new(storage, len) };
    addr.as_socket().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            "recvmsg returned an unsupported address family",
        )
    })
}
