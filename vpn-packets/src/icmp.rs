use crate::*;
use std::convert::{TryFrom, TryInto};

pub const ICMP_TYPE_ECHO_REPLY: u8 = 0;
pub const ICMP_TYPE_ECHO_REQUEST: u8 = 8;
pub const ICMP_TYPE_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_TYPE_TIME_EXCEEDED: u8 = 11;

/// ICMPv4 message (RFC 792). Only the echo request/reply layout (4-byte
/// identifier/sequence header) is interpreted; other types expose only
/// `icmp_type`/`code`/`checksum`.
#[derive(Clone, Debug)]
pub struct IcmpPacket {
    pub data: Vec<u8>,
    pub header_offset: usize,
}

impl IcmpPacket {
    pub fn new(data: Vec<u8>, header_offset: usize) -> Result<IcmpPacket, &'static str> {
        if data.len() < header_offset + 8 {
            return Err("Packet too short to be an ICMP message");
        }
        Ok(IcmpPacket { data, header_offset })
    }

    pub fn build_echo(icmp_type: u8, identifier: u16, sequence: u16, payload: &[u8]) -> IcmpPacket {
        let mut data = vec![0u8; 8 + payload.len()];
        data[0] = icmp_type;
        data[4..6].copy_from_slice(&identifier.to_be_bytes());
        data[6..8].copy_from_slice(&sequence.to_be_bytes());
        data[8..].copy_from_slice(payload);
        let mut packet = IcmpPacket { data, header_offset: 0 };
        packet.set_checksum();
        packet
    }

    pub fn icmp_type(&self) -> u8 {
        self.data[self.header_offset]
    }

    pub fn code(&self) -> u8 {
        self.data[self.header_offset + 1]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset + 2..=self.header_offset + 3]
                .try_into()
                .unwrap(),
        )
    }

    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset + 4..=self.header_offset + 5]
                .try_into()
                .unwrap(),
        )
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset + 6..=self.header_offset + 7]
                .try_into()
                .unwrap(),
        )
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.header_offset + 8..]
    }

    pub fn validate_checksum(&self) -> bool {
        let mut sum = crate::udp::checksum_words(&self.data[self.header_offset..]);
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        sum as u16 == 0xFFFF
    }

    pub fn set_checksum(&mut self) {
        self.data[self.header_offset + 2] = 0;
        self.data[self.header_offset + 3] = 0;
        let checksum =
            crate::udp::fold_and_complement(crate::udp::checksum_words(&self.data[self.header_offset..]));
        self.data[self.header_offset + 2..=self.header_offset + 3]
            .copy_from_slice(&checksum.to_be_bytes());
    }

    /// Builds the echo reply for this echo request: type flipped to 0,
    /// identifier/sequence/payload preserved.
    pub fn echo_reply(&self) -> Result<IcmpPacket, &'static str> {
        if self.icmp_type() != ICMP_TYPE_ECHO_REQUEST {
            return Err("Not an echo request");
        }
        Ok(IcmpPacket::build_echo(
            ICMP_TYPE_ECHO_REPLY,
            self.identifier(),
            self.sequence(),
            &self.data[self.header_offset + 8..],
        ))
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl TryFrom<Ipv4Packet> for IcmpPacket {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        if packet.protocol() != IpProtocol::ICMP {
            return Err("Ipv4Packet payload is not ICMP");
        }
        IcmpPacket::new(packet.data, packet.payload_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_roundtrip() {
        let echo = IcmpPacket::build_echo(ICMP_TYPE_ECHO_REQUEST, 42, 1, &[1, 2, 3, 4]);
        assert_eq!(echo.icmp_type(), ICMP_TYPE_ECHO_REQUEST);
        assert_eq!(echo.identifier(), 42);
        assert_eq!(echo.sequence(), 1);
        assert_eq!(echo.payload(), &[1, 2, 3, 4]);
        assert!(echo.validate_checksum());
    }

    #[test]
    fn echo_reply_preserves_identifier_and_payload() {
        let echo = IcmpPacket::build_echo(ICMP_TYPE_ECHO_REQUEST, 42, 7, &[9, 9]);
        let reply = echo.echo_reply().unwrap();
        assert_eq!(reply.icmp_type(), ICMP_TYPE_ECHO_REPLY);
        assert_eq!(reply.identifier(), 42);
        assert_eq!(reply.sequence(), 7);
        assert_eq!(reply.payload(), &[9, 9]);
        assert!(reply.validate_checksum());
    }
}
