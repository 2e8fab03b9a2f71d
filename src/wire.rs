//! Wire header pack/unpack (§6 EXTERNAL INTERFACES). Every multi-byte field is big-endian,
//! matching the rest of this crate's network-facing code.
//!
//! Layout (bytes, all big-endian):
//!
//! ```text
//! datagram header (19 bytes):
//!   [0]      protocol        (1 = datagram, 2 = reliable)
//!   [1..9]   source address
//!   [9..11]  source port
//!   [11..19] dest address
//!   [19..21] dest port         <- actually [19..21], see DATAGRAM_HEADER_LEN below
//!
//! reliable header = datagram header + 9 bytes:
//!   [0]      message type    (Syn = 1, SynAck = 2, Ack = 3, Fin = 4, FinAck = 5, Data = 6)
//!   [1..5]   sequence number
//!   [5..9]   ack number
//! ```

use byteorder::{BigEndian, ByteOrder};

use crate::address::{Address, ADDRESS_LEN};

pub(crate) const PROTOCOL_DATAGRAM: u8 = 1;
pub(crate) const PROTOCOL_RELIABLE: u8 = 2;

pub(crate) const DATAGRAM_HEADER_LEN: usize = 1 + ADDRESS_LEN + 2 + ADDRESS_LEN + 2;
pub(crate) const RELIABLE_EXTRA_LEN: usize = 1 + 4 + 4;
pub(crate) const RELIABLE_HEADER_LEN: usize = DATAGRAM_HEADER_LEN + RELIABLE_EXTRA_LEN;

#[derive(Debug, Clone, Copy)]
pub(crate) struct DatagramHeader {
    pub(crate) source: Address,
    pub(crate) source_port: u16,
    pub(crate) dest: Address,
    pub(crate) dest_port: u16,
}

impl DatagramHeader {
    pub(crate) fn pack(&self, protocol: u8, buf: &mut [u8]) {
        assert!(buf.len() >= DATAGRAM_HEADER_LEN);
        buf[0] = protocol;
        buf[1..1 + ADDRESS_LEN].copy_from_slice(&self.source.to_bytes());
        let port_off = 1 + ADDRESS_LEN;
        BigEndian::write_u16(&mut buf[port_off..port_off + 2], self.source_port);
        let dest_off = port_off + 2;
        buf[dest_off..dest_off + ADDRESS_LEN].copy_from_slice(&self.dest.to_bytes());
        let dest_port_off = dest_off + ADDRESS_LEN;
        BigEndian::write_u16(&mut buf[dest_port_off..dest_port_off + 2], self.dest_port);
    }

    pub(crate) fn unpack(buf: &[u8]) -> Option<(u8, DatagramHeader)> {
        if buf.len() < DATAGRAM_HEADER_LEN {
            return None;
        }
        let protocol = buf[0];
        let mut source_bytes = [0u8; ADDRESS_LEN];
        source_bytes.copy_from_slice(&buf[1..1 + ADDRESS_LEN]);
        let port_off = 1 + ADDRESS_LEN;
        let source_port = BigEndian::read_u16(&buf[port_off..port_off + 2]);
        let dest_off = port_off + 2;
        let mut dest_bytes = [0u8; ADDRESS_LEN];
        dest_bytes.copy_from_slice(&buf[dest_off..dest_off + ADDRESS_LEN]);
        let dest_port_off = dest_off + ADDRESS_LEN;
        let dest_port = BigEndian::read_u16(&buf[dest_port_off..dest_port_off + 2]);
        Some((
            protocol,
            DatagramHeader {
                source: Address::from_bytes(source_bytes),
                source_port,
                dest: Address::from_bytes(dest_bytes),
                dest_port,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    Syn,
    SynAck,
    Ack,
    Fin,
    FinAck,
    Data,
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::Syn => 1,
            MessageType::SynAck => 2,
            MessageType::Ack => 3,
            MessageType::Fin => 4,
            MessageType::FinAck => 5,
            MessageType::Data => 6,
        }
    }

    fn from_byte(b: u8) -> Option<MessageType> {
        Some(match b {
            1 => MessageType::Syn,
            2 => MessageType::SynAck,
            3 => MessageType::Ack,
            4 => MessageType::Fin,
            5 => MessageType::FinAck,
            6 => MessageType::Data,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReliableHeader {
    pub(crate) datagram: DatagramHeader,
    pub(crate) message_type: MessageType,
    pub(crate) seq_number: u32,
    pub(crate) ack_number: u32,
}

impl ReliableHeader {
    pub(crate) fn pack(&self, buf: &mut [u8]) {
        assert!(buf.len() >= RELIABLE_HEADER_LEN);
        self.datagram.pack(PROTOCOL_RELIABLE, buf);
        let off = DATAGRAM_HEADER_LEN;
        buf[off] = self.message_type.to_byte();
        BigEndian::write_u32(&mut buf[off + 1..off + 5], self.seq_number);
        BigEndian::write_u32(&mut buf[off + 5..off + 9], self.ack_number);
    }

    pub(crate) fn unpack(buf: &[u8]) -> Option<ReliableHeader> {
        if buf.len() < RELIABLE_HEADER_LEN {
            return None;
        }
        let (protocol, datagram) = DatagramHeader::unpack(buf)?;
        if protocol != PROTOCOL_RELIABLE {
            return None;
        }
        let off = DATAGRAM_HEADER_LEN;
        let message_type = MessageType::from_byte(buf[off])?;
        let seq_number = BigEndian::read_u32(&buf[off + 1..off + 5]);
        let ack_number = BigEndian::read_u32(&buf[off + 5..off + 9]);
        Some(ReliableHeader { datagram, message_type, seq_number, ack_number })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; ADDRESS_LEN])
    }

    #[test]
    fn datagram_header_round_trips() {
        let h = DatagramHeader { source: addr(1), source_port: 40000, dest: addr(2), dest_port: 25 };
        let mut buf = [0u8; DATAGRAM_HEADER_LEN];
        h.pack(PROTOCOL_DATAGRAM, &mut buf);
        let (protocol, unpacked) = DatagramHeader::unpack(&buf).unwrap();
        assert_eq!(protocol, PROTOCOL_DATAGRAM);
        assert_eq!(unpacked.source, h.source);
        assert_eq!(unpacked.source_port, h.source_port);
        assert_eq!(unpacked.dest, h.dest);
        assert_eq!(unpacked.dest_port, h.dest_port);
    }

    #[test]
    fn reliable_header_round_trips_and_rejects_wrong_protocol() {
        let datagram = DatagramHeader { source: addr(3), source_port: 33333, dest: addr(4), dest_port: 44444 };
        let h = ReliableHeader { datagram, message_type: MessageType::SynAck, seq_number: 7, ack_number: 9 };
        let mut buf = [0u8; RELIABLE_HEADER_LEN];
        h.pack(&mut buf);
        let unpacked = ReliableHeader::unpack(&buf).unwrap();
        assert_eq!(unpacked.message_type, MessageType::SynAck);
        assert_eq!(unpacked.seq_number, 7);
        assert_eq!(unpacked.ack_number, 9);

        let mut datagram_only = [0u8; DATAGRAM_HEADER_LEN];
        datagram.pack(PROTOCOL_DATAGRAM, &mut datagram_only);
        assert!(ReliableHeader::unpack(&datagram_only).is_none());
    }
}
