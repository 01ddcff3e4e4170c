use crate::*;
use std::convert::{TryFrom, TryInto};
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug)]
pub struct UdpSegment {
    pub data: Vec<u8>,
    pub header_offset: usize,
    pub payload_offset: usize,
}

impl UdpSegment {
    pub fn new(data: Vec<u8>, header_offset: usize) -> Result<UdpSegment, &'static str> {
        if data.len() < header_offset + 8 {
            return Err("Segment too short to contain a valid UDP header");
        }

        let length = u16::from_be_bytes(
            data[header_offset + 4..=header_offset + 5]
                .try_into()
                .unwrap(),
        );

        if data.len() != header_offset + length as usize {
            return Err("Segment is not the length given by its length field");
        }

        Ok(UdpSegment {
            data,
            header_offset,
            payload_offset: header_offset + 8,
        })
    }

    pub fn build(src_port: u16, dest_port: u16, payload: &[u8]) -> UdpSegment {
        let mut data = vec![0u8; 8];
        data[4..6].copy_from_slice(&8u16.to_be_bytes());
        let mut segment = UdpSegment {
            data,
            header_offset: 0,
            payload_offset: 8,
        };
        segment.set_src_port(src_port);
        segment.set_dest_port(dest_port);
        segment.set_payload(payload);
        segment
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset..=self.header_offset + 1]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_src_port(&mut self, port: u16) -> &mut Self {
        self.data[self.header_offset..=self.header_offset + 1].copy_from_slice(&port.to_be_bytes());
        self
    }

    pub fn dest_port(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset + 2..=self.header_offset + 3]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_dest_port(&mut self, port: u16) -> &mut Self {
        self.data[self.header_offset + 2..=self.header_offset + 3]
            .copy_from_slice(&port.to_be_bytes());
        self
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset + 4..=self.header_offset + 5]
                .try_into()
                .unwrap(),
        )
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(
            self.data[self.header_offset + 6..=self.header_offset + 7]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_checksum_raw(&mut self, checksum: u16) -> &mut Self {
        self.data[self.header_offset + 6..=self.header_offset + 7]
            .copy_from_slice(&checksum.to_be_bytes());
        self
    }

    pub fn set_checksum_ipv4(&mut self, src: Ipv4Addr, dest: Ipv4Addr) {
        self.set_checksum_raw(0);
        let sum = pseudo_header_sum_v4(src, dest, IpProtocol::UDP, self.data.len() as u32)
            + checksum_words(&self.data);
        self.set_checksum_raw(fold_and_complement(sum));
    }

    pub fn set_checksum_ipv6(&mut self, src: Ipv6Addr, dest: Ipv6Addr) {
        self.set_checksum_raw(0);
        let sum = pseudo_header_sum_v6(src, dest, IpProtocol::UDP, self.data.len() as u32)
            + checksum_words(&self.data);
        self.set_checksum_raw(fold_and_complement(sum));
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload_offset..]
    }

    /// Caller must update the length field of whatever IP packet contains
    /// this segment.
    pub fn set_payload(&mut self, payload: &[u8]) -> &mut Self {
        self.data.truncate(self.payload_offset);
        self.data.reserve_exact(payload.len());
        self.data.extend_from_slice(payload);
        let len = (self.data.len() - self.header_offset) as u16;
        self.data[self.header_offset + 4..self.header_offset + 6]
            .copy_from_slice(&len.to_be_bytes());
        self
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

pub(crate) fn checksum_words(data: &[u8]) -> u32 {
    data.chunks(2)
        .map(|chunk| {
            if chunk.len() == 2 {
                u32::from(u16::from_be_bytes([chunk[0], chunk[1]]))
            } else {
                u32::from(chunk[0]) << 8
            }
        })
        .sum()
}

pub(crate) fn fold_and_complement(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    let folded = !(sum as u16);
    if folded == 0 {
        0xFFFF
    } else {
        folded
    }
}

pub(crate) fn pseudo_header_sum_v4(
    src: Ipv4Addr,
    dest: Ipv4Addr,
    protocol: IpProtocol,
    upper_layer_len: u32,
) -> u32 {
    let mut pseudo = Vec::with_capacity(12);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dest.octets());
    pseudo.push(0);
    pseudo.push(protocol.as_u8());
    pseudo.extend_from_slice(&(upper_layer_len as u16).to_be_bytes());
    checksum_words(&pseudo)
}

pub(crate) fn pseudo_header_sum_v6(
    src: Ipv6Addr,
    dest: Ipv6Addr,
    protocol: IpProtocol,
    upper_layer_len: u32,
) -> u32 {
    let mut pseudo = Vec::with_capacity(40);
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dest.octets());
    pseudo.extend_from_slice(&upper_layer_len.to_be_bytes());
    pseudo.extend_from_slice(&[0, 0, 0]);
    pseudo.push(protocol.as_u8());
    checksum_words(&pseudo)
}

impl PartialEq for UdpSegment {
    fn eq(&self, other: &Self) -> bool {
        self.data[self.header_offset..] == other.data[other.header_offset..]
    }
}

impl Eq for UdpSegment {}

impl TryFrom<Ipv4Packet> for UdpSegment {
    type Error = &'static str;

    fn try_from(packet: Ipv4Packet) -> Result<Self, Self::Error> {
        if packet.protocol() != IpProtocol::UDP {
            return Err("Ipv4Packet payload is not UDP");
        }
        UdpSegment::new(packet.data, packet.payload_offset)
    }
}

impl TryFrom<Ipv6Packet> for UdpSegment {
    type Error = &'static str;

    fn try_from(packet: Ipv6Packet) -> Result<Self, Self::Error> {
        if packet.next_header() != IpProtocol::UDP {
            return Err("Ipv6Packet payload is not UDP");
        }
        UdpSegment::new(packet.data, packet.payload_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_segment() {
        let ipv4_data: Vec<u8> = vec![
            0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 192, 178, 128, 0, 10, 0, 0, 1,
        ];
        let udp_data: Vec<u8> = vec![
            0, 99, 0, 88, 0, 19, 0xDE, 0xAD, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10,
        ];

        let mut packet = Ipv4Packet::new(ipv4_data, 0).unwrap();
        packet.set_payload(&udp_data);
        let segment = UdpSegment::try_from(packet).unwrap();

        assert_eq!(segment.src_port(), 99);
        assert_eq!(segment.dest_port(), 88);
        assert_eq!(segment.length(), 19);
        assert_eq!(segment.checksum(), 0xDEAD);
        assert_eq!(segment.payload().len(), 11);
        assert_eq!(segment.payload()[0], 0);
    }

    #[test]
    fn build_sets_length() {
        let segment = UdpSegment::build(68, 67, &[1, 2, 3]);
        assert_eq!(segment.src_port(), 68);
        assert_eq!(segment.dest_port(), 67);
        assert_eq!(segment.length(), 11);
    }

    #[test]
    fn checksum_v4_roundtrip() {
        let mut segment = UdpSegment::build(68, 67, &[1, 2, 3, 4]);
        segment.set_checksum_ipv4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_ne!(segment.checksum(), 0);
    }
}
