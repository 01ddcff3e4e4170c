//! Single-pass, zero-copy packet parser: Ethernet -> ARP/IPv4/IPv6 ->
//! ICMP/UDP/ESP. The result borrows the original frame buffer.

use std::convert::TryFrom;

use vpn_packets::{
    get_ipv4_payload_type, get_ipv6_payload_type, ArpFrame, EthernetFrame, IpProtocol, MacAddr,
    ETHER_TYPE_ARP, ETHER_TYPE_IPV4, ETHER_TYPE_IPV6,
};

#[derive(Debug)]
pub enum L3<'a> {
    Arp(&'a [u8]),
    Ipv4(&'a [u8]),
    Ipv6(&'a [u8]),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Kind {
    Icmp,
    Udp,
    Tcp,
    Esp,
    Unknown,
}

pub struct ParsedPacket<'a> {
    pub mac_header: &'a [u8],
    pub l3: L3<'a>,
    pub l4: L4Kind,
    pub is_broadcast: bool,
    pub is_for_me: bool,
}

/// Parses one Ethernet frame. Validity gates: source MAC must not equal
/// destination MAC, must not be broadcast, must not be zero.
pub fn parse<'a>(frame: &'a [u8], local_mac: MacAddr) -> Result<ParsedPacket<'a>, &'static str> {
    if frame.len() < 14 {
        return Err("frame shorter than an Ethernet header");
    }
    let dest = MacAddr::from_slice(&frame[0..6])?;
    let src = MacAddr::from_slice(&frame[6..12])?;

    if src == dest {
        return Err("source MAC equals destination MAC");
    }
    if src.is_broadcast() {
        return Err("source MAC is broadcast");
    }
    if src.is_zero() {
        return Err("source MAC is zero");
    }

    let ether_type = u16::from_be_bytes([frame[12], frame[13]]);
    let payload = &frame[14..];

    let l3 = match ether_type {
        ETHER_TYPE_ARP => L3::Arp(payload),
        ETHER_TYPE_IPV4 => L3::Ipv4(payload),
        ETHER_TYPE_IPV6 => L3::Ipv6(payload),
        _ => L3::Unknown,
    };

    let l4 = l4_kind(&l3);
    let is_broadcast = dest.is_broadcast();
    let is_for_me = dest == local_mac || dest.is_broadcast() || dest.is_multicast();

    Ok(ParsedPacket {
        mac_header: &frame[0..14],
        l3,
        l4,
        is_broadcast,
        is_for_me,
    })
}

fn l4_kind(l3: &L3) -> L4Kind {
    match l3 {
        L3::Ipv4(payload) => match get_ipv4_payload_type(payload, 0) {
            Ok(IpProtocol::ICMP) => L4Kind::Icmp,
            Ok(IpProtocol::UDP) => L4Kind::Udp,
            Ok(IpProtocol::TCP) => L4Kind::Tcp,
            Ok(IpProtocol::ESP) => L4Kind::Esp,
            _ => L4Kind::Unknown,
        },
        L3::Ipv6(payload) => match get_ipv6_payload_type(payload, 0) {
            IpProtocol::IPv6_ICMP => L4Kind::Icmp,
            IpProtocol::UDP => L4Kind::Udp,
            IpProtocol::TCP => L4Kind::Tcp,
            IpProtocol::ESP => L4Kind::Esp,
            _ => L4Kind::Unknown,
        },
        L3::Arp(_) | L3::Unknown => L4Kind::Unknown,
    }
}

/// Recovers a typed `ArpFrame` from a parsed ARP payload, for callers
/// that need more than the dispatch tag.
pub fn as_arp_frame(frame: Vec<u8>) -> Result<ArpFrame, &'static str> {
    let ethernet = EthernetFrame::new(frame)?;
    ArpFrame::try_from(ethernet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ether_frame(src: [u8; 6], dest: [u8; 6], ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 14];
        data[0..6].copy_from_slice(&dest);
        data[6..12].copy_from_slice(&src);
        data[12..14].copy_from_slice(&ether_type.to_be_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn zero_source_mac_is_rejected() {
        let frame = ether_frame([0; 6], [1, 0, 0, 0, 0, 1], ETHER_TYPE_IPV4, &[]);
        let local = MacAddr::new([1, 0, 0, 0, 0, 1]);
        assert!(parse(&frame, local).is_err());
    }

    #[test]
    fn src_equal_dest_is_rejected() {
        let mac = [2, 0, 0, 0, 0, 2];
        let frame = ether_frame(mac, mac, ETHER_TYPE_IPV4, &[]);
        assert!(parse(&frame, MacAddr::new([1, 0, 0, 0, 0, 1])).is_err());
    }

    #[test]
    fn arp_ethertype_dispatches_to_arp() {
        let frame = ether_frame(
            [2, 0, 0, 0, 0, 2],
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
            ETHER_TYPE_ARP,
            &[0; 28],
        );
        let parsed = parse(&frame, MacAddr::new([1, 0, 0, 0, 0, 1])).unwrap();
        assert!(matches!(parsed.l3, L3::Arp(_)));
        assert!(parsed.is_broadcast);
        assert!(parsed.is_for_me);
    }
}
