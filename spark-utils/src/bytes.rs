//
// Copyright (c) The Spark Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(4096))
);

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets an IPv4 address from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError>;

    /// Gets an optional IPv4 address from `self` in big-endian byte order,
    /// mapping the unspecified address to `None`.
    ///
    /// The current position is advanced by 4.
    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError>;

    /// Gets an IPv6 address from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError>;

    /// Gets an optional IPv6 address from `self` in big-endian byte order,
    /// mapping the unspecified address to `None`.
    ///
    /// The current position is advanced by 16.
    fn try_get_opt_ipv6(&mut self) -> Result<Option<Ipv6Addr>, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes an IPv4 address to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 4.
    fn put_ipv4(&mut self, addr: &Ipv4Addr);

    /// Writes an optional IPv4 address to `self` in big-endian byte order,
    /// mapping `None` to the unspecified address.
    ///
    /// The current position is advanced by 4.
    fn put_opt_ipv4(&mut self, addr: &Option<Ipv4Addr>);

    /// Writes an IPv6 address to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 16.
    fn put_ipv6(&mut self, addr: &Ipv6Addr);

    /// Writes an optional IPv6 address to `self` in big-endian byte order,
    /// mapping `None` to the unspecified address.
    ///
    /// The current position is advanced by 16.
    fn put_opt_ipv6(&mut self, addr: &Option<Ipv6Addr>);
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError> {
        Ok(Ipv4Addr::from(self.try_get_u32()?))
    }

    fn try_get_opt_ipv4(&mut self) -> Result<Option<Ipv4Addr>, TryGetError> {
        let addr = self.try_get_ipv4()?;
        if addr.is_unspecified() {
            Ok(None)
        } else {
            Ok(Some(addr))
        }
    }

    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError> {
        Ok(Ipv6Addr::from(self.try_get_u128()?))
    }

    fn try_get_opt_ipv6(&mut self) -> Result<Option<Ipv6Addr>, TryGetError> {
        let addr = self.try_get_ipv6()?;
        if addr.is_unspecified() {
            Ok(None)
        } else {
            Ok(Some(addr))
        }
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32((*addr).into());
    }

    fn put_opt_ipv4(&mut self, addr: &Option<Ipv4Addr>) {
        self.put_ipv4(&addr.unwrap_or(Ipv4Addr::UNSPECIFIED));
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets());
    }

    fn put_opt_ipv6(&mut self, addr: &Option<Ipv6Addr>) {
        self.put_ipv6(&addr.unwrap_or(Ipv6Addr::UNSPECIFIED));
    }
}
