//! Network addresses (§6 GLOSSARY: "Address"). An 8-byte opaque value identifying a network
//! endpoint, wide enough for an IPv4 address + port pair without tying the wire format to
//! either `std::net::SocketAddr`'s size or layout.

use byteorder::{BigEndian, ByteOrder};
use std::net::SocketAddrV4;

pub const ADDRESS_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub(crate) fn blank() -> Address {
        Address([0; ADDRESS_LEN])
    }

    pub(crate) const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Address {
        Address(bytes)
    }

    pub(crate) fn to_bytes(self) -> [u8; ADDRESS_LEN] {
        self.0
    }

    pub fn from_socket_addr(addr: SocketAddrV4) -> Address {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[0..4].copy_from_slice(&addr.ip().octets());
        BigEndian::write_u16(&mut bytes[4..6], addr.port());
        Address(bytes)
    }

    pub fn to_socket_addr(self) -> SocketAddrV4 {
        let ip = std::net::Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3]);
        let port = BigEndian::read_u16(&self.0[4..6]);
        SocketAddrV4::new(ip, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_socket_addr() {
        let sa = SocketAddrV4::new(std::net::Ipv4Addr::new(10, 0, 0, 1), 4096);
        let addr = Address::from_socket_addr(sa);
        assert_eq!(addr.to_socket_addr(), sa);
    }
}
