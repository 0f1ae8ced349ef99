//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv6Addr, SocketAddr};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

pub use socket2::Socket;
pub use tokio::net::UdpSocket;

use crate::ip::AddressFamily;

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for UdpSocket.
pub trait UdpSocketExt {
    // Creates a UDP socket from the given address.
    //
    // This is the same as [`UdpSocket::bind`], except that the `SO_REUSEADDR`
    // option is set before binding.
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket>;

    // Executes an operation of the IPV6_ADD_MEMBERSHIP type.
    fn join_multicast_ifindex_v6(
        &self,
        multiaddr: &Ipv6Addr,
        ifindex: u32,
    ) -> Result<()>;

    // Executes an operation of the IPV6_DROP_MEMBERSHIP type.
    fn leave_multicast_ifindex_v6(
        &self,
        multiaddr: &Ipv6Addr,
        ifindex: u32,
    ) -> Result<()>;

    // Sets the value of the IPV6_MULTICAST_IF option for this socket.
    fn set_multicast_ifindex_v6(&self, ifindex: u32) -> Result<()>;

    // Sets the value of the IPV6_MULTICAST_HOPS option for this socket.
    fn set_multicast_hopcount_v6(&self, hopcount: u8) -> Result<()>;

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_unicast_hops_v6(&self, hops: u8) -> Result<()>;

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()>;
}

// ===== impl UdpSocket =====

impl UdpSocketExt for UdpSocket {
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
        use socket2::{Domain, Type};

        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    }

    fn join_multicast_ifindex_v6(
        &self,
        multiaddr: &Ipv6Addr,
        ifindex: u32,
    ) -> Result<()> {
        let optval = libc::ipv6_mreq {
            ipv6mr_multiaddr: libc::in6_addr {
                s6_addr: multiaddr.octets(),
            },
            ipv6mr_interface: ifindex,
        };

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_ADD_MEMBERSHIP,
            &optval,
        )
    }

    fn leave_multicast_ifindex_v6(
        &self,
        multiaddr: &Ipv6Addr,
        ifindex: u32,
    ) -> Result<()> {
        let optval = libc::ipv6_mreq {
            ipv6mr_multiaddr: libc::in6_addr {
                s6_addr: multiaddr.octets(),
            },
            ipv6mr_interface: ifindex,
        };

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_DROP_MEMBERSHIP,
            &optval,
        )
    }

    fn set_multicast_ifindex_v6(&self, ifindex: u32) -> Result<()> {
        let optval = ifindex as c_int;

        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_IF, &optval)
    }

    fn set_multicast_hopcount_v6(&self, hopcount: u8) -> Result<()> {
        let optval = hopcount as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_MULTICAST_HOPS,
            &optval,
        )
    }

    fn set_unicast_hops_v6(&self, hops: u8) -> Result<()> {
        let optval = hops as c_int;

        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, &optval)
    }

    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()> {
        let optval = dscp as c_int;

        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, &optval)
    }
}

// ===== helper functions =====

fn setsockopt<F: AsRawFd, T>(
    sock: &F,
    level: c_int,
    optname: c_int,
    optval: &T,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            level,
            optname,
            optval as *const T as *const c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

/// Returns a wildcard socket address of the given family and port.
pub fn wildcard_sockaddr(af: AddressFamily, port: u16) -> SocketAddr {
    use std::net::{IpAddr, Ipv4Addr};

    let addr = match af {
        AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::from((addr, port))
}
