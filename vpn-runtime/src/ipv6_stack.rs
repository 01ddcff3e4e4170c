//! IPv6 stack: Neighbor Discovery (RS/RA/NS/NA), fragmentation/
//! reassembly sharing the same table shape as IPv4, and EUI-64 address
//! generation.

use std::net::Ipv6Addr;
use std::time::Duration;

use log::debug;
use vpn_packets::{
    build_neighbor_advertisement, EthernetFrame, Icmpv6Packet, IpProtocol, Ipv6Packet, MacAddr,
    UdpSegment, ETHER_TYPE_IPV6, ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT,
    ICMPV6_TYPE_NEIGHBOR_SOLICITATION, ICMPV6_TYPE_ROUTER_ADVERTISEMENT,
    ICMPV6_TYPE_ROUTER_SOLICITATION, ND_OPTION_SOURCE_LINK_ADDR, ND_OPTION_TARGET_LINK_ADDR,
};

use std::convert::TryFrom;

use crate::config::V6Config;
use crate::ndp_cache::{link_local_from_mac, NdpCache};
use crate::reassembly::{ReassemblyKey, ReassemblyTable};

const RA_OPTION_PREFIX_INFORMATION: u8 = 3;
const RA_OPTION_RECURSIVE_DNS: u8 = 25;
const FRAGMENT_ALIGN: usize = 8;
const NDP_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Solicited-node multicast address for `target`, per RFC 4291 2.7.1.
fn solicited_node_multicast(target: Ipv6Addr) -> Ipv6Addr {
    let o = target.octets();
    Ipv6Addr::new(
        0xff02, 0, 0, 0, 0, 1,
        0xff00 | o[13] as u16,
        u16::from_be_bytes([o[14], o[15]]),
    )
}

/// Ethernet multicast MAC that carries a given IPv6 multicast address, per
/// RFC 2464: `33:33` followed by the low 32 bits of the address.
fn multicast_mac(addr: Ipv6Addr) -> MacAddr {
    let o = addr.octets();
    MacAddr::new([0x33, 0x33, o[12], o[13], o[14], o[15]])
}

pub struct Ipv6Stack {
    pub local_mac: MacAddr,
    pub local_ip: Ipv6Addr,
    pub link_local: Ipv6Addr,
    pub mtu: u16,
    ra_enabled: bool,
    ra_prefix: Ipv6Addr,
    ra_prefix_len: u8,
    ra_lifetime: u32,
    ra_dns: Vec<Ipv6Addr>,
    use_proxy_ndp: bool,
    proxy_exception: Ipv6Addr,
    ndp_cache: NdpCache,
    reassembly: ReassemblyTable,
    pub changed: bool,
}

pub enum Delivery {
    Icmp(Icmpv6Packet),
    Udp(UdpSegment),
    RawIp(Ipv6Packet),
}

impl Ipv6Stack {
    pub fn new(local_mac: MacAddr, config: &V6Config) -> Ipv6Stack {
        Ipv6Stack {
            local_mac,
            local_ip: config.guest_virtual_gateway,
            link_local: link_local_from_mac(local_mac),
            mtu: config.guest_mtu,
            ra_enabled: config.ra_enabled,
            ra_prefix: config.ra_prefix,
            ra_prefix_len: config.ra_prefix_len,
            ra_lifetime: config.ra_lifetime_seconds,
            ra_dns: config.ra_dns.clone(),
            use_proxy_ndp: config.use_proxy_ndp,
            proxy_exception: config.guest_ip,
            ndp_cache: NdpCache::new(Duration::from_secs(config.neighbor_expires_seconds)),
            reassembly: ReassemblyTable::new(),
            changed: false,
        }
    }

    pub fn receive_ether(&mut self, frame: Vec<u8>) -> (Option<Delivery>, Vec<Vec<u8>>) {
        if let Err(reason) = crate::parser::parse(&frame, self.local_mac) {
            debug!("dropping Ethernet frame: {}", reason);
            return (None, Vec::new());
        }
        let ethernet = match EthernetFrame::new(frame) {
            Ok(f) => f,
            Err(_) => return (None, Vec::new()),
        };
        if ethernet.ether_type() != ETHER_TYPE_IPV6 {
            return (None, Vec::new());
        }

        let packet = match Ipv6Packet::new(ethernet.data, ethernet.payload_offset) {
            Ok(p) => p,
            Err(_) => return (None, Vec::new()),
        };

        let (more_fragments, datagram) = self.reassemble_if_needed(packet);
        let packet = match datagram {
            Some(p) => p,
            None => {
                let _ = more_fragments;
                return (None, Vec::new());
            }
        };

        self.dispatch(packet)
    }

    fn reassemble_if_needed(&mut self, packet: Ipv6Packet) -> (bool, Option<Ipv6Packet>) {
        if packet.next_header() != IpProtocol::IPv6_frag {
            return (false, Some(packet));
        }

        // `payload_offset` already accounts for the extension header chain,
        // so the fragment header itself has to be recovered separately.
        let frag_header = match packet.extension_headers().first() {
            Some(h) if h.len() == 8 => *h,
            _ => return (false, None),
        };
        let next_header = IpProtocol::from(frag_header[0]);
        let offset_word = u16::from_be_bytes([frag_header[2], frag_header[3]]);
        let more_fragments = offset_word & 1 != 0;
        let fragment_offset = (offset_word >> 3) as usize * FRAGMENT_ALIGN;
        let identification = u32::from_be_bytes(frag_header[4..8].try_into().unwrap());
        let fragment_payload = packet.payload().to_vec();

        let key = ReassemblyKey {
            src: std::net::IpAddr::V6(packet.src_addr()),
            dst: std::net::IpAddr::V6(packet.dest_addr()),
            identification,
            protocol: next_header.as_u8(),
        };
        let hop_limit = packet.hop_limit();

        match self.reassembly.accept_fragment(
            key,
            fragment_offset,
            &fragment_payload,
            more_fragments,
            next_header,
            hop_limit,
            false,
        ) {
            Some(full_payload) => {
                let mut rebuilt = Ipv6Packet::build(next_header, hop_limit, &full_payload);
                rebuilt.set_src_addr(packet.src_addr());
                rebuilt.set_dest_addr(packet.dest_addr());
                (more_fragments, Some(rebuilt))
            }
            None => (more_fragments, None),
        }
    }

    fn dispatch(&mut self, packet: Ipv6Packet) -> (Option<Delivery>, Vec<Vec<u8>>) {
        match packet.next_header() {
            IpProtocol::IPv6_ICMP => {
                let src = packet.src_addr();
                match Icmpv6Packet::try_from(packet) {
                    Ok(icmp) => self.dispatch_icmpv6(icmp, src),
                    Err(_) => (None, Vec::new()),
                }
            }
            IpProtocol::UDP => match UdpSegment::try_from(packet) {
                Ok(segment) => (Some(Delivery::Udp(segment)), Vec::new()),
                Err(_) => (None, Vec::new()),
            },
            _ => (Some(Delivery::RawIp(packet)), Vec::new()),
        }
    }

    fn dispatch_icmpv6(&mut self, icmp: Icmpv6Packet, src: Ipv6Addr) -> (Option<Delivery>, Vec<Vec<u8>>) {
        match icmp.icmp_type() {
            ICMPV6_TYPE_ROUTER_SOLICITATION if self.ra_enabled => {
                (None, vec![self.build_ra_frame(src)])
            }
            ICMPV6_TYPE_NEIGHBOR_SOLICITATION => (None, self.handle_ns(&icmp, src)),
            ICMPV6_TYPE_NEIGHBOR_ADVERTISEMENT => {
                let ready = self.handle_na(&icmp);
                self.changed = self.changed || !ready.is_empty();
                (None, ready)
            }
            _ => (Some(Delivery::Icmp(icmp)), Vec::new()),
        }
    }

    fn handle_ns(&mut self, icmp: &Icmpv6Packet, src: Ipv6Addr) -> Vec<Vec<u8>> {
        let target = icmp.target_address();
        let should_reply =
            target == self.local_ip || (self.use_proxy_ndp && target != self.proxy_exception);
        if !should_reply {
            return Vec::new();
        }

        let mut na = build_neighbor_advertisement(target, self.local_mac, true, true);
        na.set_checksum_ipv6(self.link_local, src);
        let mut ip = Ipv6Packet::build(IpProtocol::IPv6_ICMP, 255, &na.into_data());
        ip.set_src_addr(self.link_local);
        ip.set_dest_addr(src);

        let solicitor_mac = icmp
            .link_layer_option(ND_OPTION_SOURCE_LINK_ADDR)
            .unwrap_or(MacAddr::BROADCAST);
        vec![self.frame_for(solicitor_mac, ip.into_data())]
    }

    fn handle_na(&mut self, icmp: &Icmpv6Packet) -> Vec<Vec<u8>> {
        let target = icmp.target_address();
        let mac = match icmp.link_layer_option(ND_OPTION_TARGET_LINK_ADDR) {
            Some(mac) => mac,
            None => return Vec::new(),
        };
        self.ndp_cache
            .resolve(target, mac)
            .into_iter()
            .map(|datagram| self.frame_for(mac, datagram))
            .collect()
    }

    fn build_ra_frame(&self, dest: Ipv6Addr) -> Vec<u8> {
        let mut body = vec![0u8; 16];
        body[0] = ICMPV6_TYPE_ROUTER_ADVERTISEMENT;
        body[4] = 64; // cur hop limit
        body[6..8].copy_from_slice(&(self.ra_lifetime as u16).to_be_bytes());

        // Prefix Information option.
        let mut prefix_opt = vec![0u8; 32];
        prefix_opt[0] = RA_OPTION_PREFIX_INFORMATION;
        prefix_opt[1] = 4; // 32 bytes / 8
        prefix_opt[2] = self.ra_prefix_len;
        prefix_opt[3] = 0xC0; // on-link + autonomous
        prefix_opt[4..8].copy_from_slice(&self.ra_lifetime.to_be_bytes());
        prefix_opt[8..12].copy_from_slice(&self.ra_lifetime.to_be_bytes());
        prefix_opt[16..32].copy_from_slice(&self.ra_prefix.octets());
        body.extend_from_slice(&prefix_opt);

        // Source Link-layer Address option.
        body.extend_from_slice(&[ND_OPTION_SOURCE_LINK_ADDR, 1]);
        body.extend_from_slice(&self.local_mac.bytes);

        if !self.ra_dns.is_empty() {
            let words = 1 + self.ra_dns.len() * 2;
            body.push(RA_OPTION_RECURSIVE_DNS);
            body.push(words as u8);
            body.extend_from_slice(&[0, 0]);
            body.extend_from_slice(&self.ra_lifetime.to_be_bytes());
            for server in &self.ra_dns {
                body.extend_from_slice(&server.octets());
            }
        }

        let mut icmp = Icmpv6Packet::new(body, 0).expect("RA body always long enough");
        icmp.set_checksum_ipv6(self.link_local, dest);
        let mut ip = Ipv6Packet::build(IpProtocol::IPv6_ICMP, 255, &icmp.into_data());
        ip.set_src_addr(self.link_local);
        ip.set_dest_addr(dest);
        self.frame_for(MacAddr::BROADCAST, ip.into_data())
    }

    fn frame_for(&self, dest_mac: MacAddr, ip_payload: Vec<u8>) -> Vec<u8> {
        let mut eth = EthernetFrame::empty();
        eth.set_ether_type(ETHER_TYPE_IPV6);
        eth.set_src_mac(self.local_mac);
        eth.set_dest_mac(dest_mac);
        eth.set_payload(&ip_payload);
        eth.into_data()
    }

    /// Builds an Ethernet-framed IPv6 datagram and either sends it
    /// immediately (neighbor cache hit) or queues it behind resolution.
    pub fn send_ip(&mut self, dest: Ipv6Addr, next_header: IpProtocol, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut packet = Ipv6Packet::build(next_header, 64, payload);
        packet.set_src_addr(self.link_local);
        packet.set_dest_addr(dest);
        self.send_raw_ip(packet)
    }

    pub fn send_udp(&mut self, dest: Ipv6Addr, src_port: u16, dest_port: u16, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut udp = UdpSegment::build(src_port, dest_port, payload);
        udp.set_checksum_ipv6(self.link_local, dest);
        self.send_ip(dest, IpProtocol::UDP, &udp.into_data())
    }

    /// Hands a prebuilt IPv6 packet to the fragmentation-and-NDP path.
    pub fn send_raw_ip(&mut self, packet: Ipv6Packet) -> Vec<Vec<u8>> {
        let dest = packet.dest_addr();
        let mac = match self.ndp_cache.lookup(dest) {
            Some(mac) => mac,
            None => {
                self.ndp_cache.wait_for(dest, packet.into_data(), NDP_WAIT_TIMEOUT);
                self.changed = true;
                return self.send_neighbor_solicitation(dest);
            }
        };

        let mtu = self.mtu as usize;
        let total_len = 40 + packet.payload().len();
        if total_len <= mtu {
            return vec![self.frame_for(mac, packet.into_data())];
        }

        self.fragment(packet, mtu)
            .into_iter()
            .map(|frag| self.frame_for(mac, frag))
            .collect()
    }

    fn fragment(&self, packet: Ipv6Packet, mtu: usize) -> Vec<Vec<u8>> {
        let next_header = packet.next_header();
        let hop_limit = packet.hop_limit();
        let src = packet.src_addr();
        let dest = packet.dest_addr();
        let payload = packet.payload().to_vec();
        let identification: u32 = u32::from(src.octets()[15]) << 8 | u32::from(dest.octets()[15]);

        let max_payload_per_frag = ((mtu - 48) / FRAGMENT_ALIGN) * FRAGMENT_ALIGN;
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + max_payload_per_frag).min(payload.len());
            let more_fragments = end < payload.len();

            let mut frag_header = vec![0u8; 8];
            frag_header[0] = next_header.as_u8();
            let offset_word = ((offset / FRAGMENT_ALIGN) as u16) << 3 | (more_fragments as u16);
            frag_header[2..4].copy_from_slice(&offset_word.to_be_bytes());
            frag_header[4..8].copy_from_slice(&identification.to_be_bytes());
            frag_header.extend_from_slice(&payload[offset..end]);

            let mut frag = Ipv6Packet::build(IpProtocol::IPv6_frag, hop_limit, &frag_header);
            frag.set_src_addr(src);
            frag.set_dest_addr(dest);
            frames.push(frag.into_data());
            offset = end;
        }
        frames
    }

    fn send_neighbor_solicitation(&self, target: Ipv6Addr) -> Vec<Vec<u8>> {
        let mut body = vec![0u8; 24 + 8];
        body[0] = ICMPV6_TYPE_NEIGHBOR_SOLICITATION;
        body[8..24].copy_from_slice(&target.octets());
        body[24] = ND_OPTION_SOURCE_LINK_ADDR;
        body[25] = 1;
        body[26..32].copy_from_slice(&self.local_mac.bytes);

        let mut icmp = Icmpv6Packet::new(body, 0).expect("NS body always long enough");
        let dest = solicited_node_multicast(target);
        icmp.set_checksum_ipv6(self.link_local, dest);

        let mut ip = Ipv6Packet::build(IpProtocol::IPv6_ICMP, 255, &icmp.into_data());
        ip.set_src_addr(self.link_local);
        ip.set_dest_addr(dest);
        vec![self.frame_for(multicast_mac(dest), ip.into_data())]
    }

    pub fn on_tick(&mut self) -> Vec<Vec<u8>> {
        self.ndp_cache.purge_expired();
        self.reassembly.purge_expired();
        let due = self.ndp_cache.due_for_retry();
        if !due.is_empty() {
            debug!("re-soliciting {} stale neighbor(s)", due.len());
        }
        due.into_iter().flat_map(|ip| self.send_neighbor_solicitation(ip)).collect()
    }

    pub fn deliver_from_tunnel(&mut self, datagram: Ipv6Packet) -> (Option<Delivery>, Vec<Vec<u8>>) {
        self.dispatch(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> V6Config {
        V6Config {
            bind: Ipv6Addr::UNSPECIFIED,
            guest_ip: Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2),
            guest_mtu: 1500,
            guest_virtual_gateway: Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1),
            ra_enabled: true,
            ra_prefix: Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0),
            ra_prefix_len: 64,
            ra_lifetime_seconds: 1800,
            ra_dns: vec![Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)],
            host_ip: Ipv6Addr::UNSPECIFIED,
            host_mtu: 1500,
            neighbor_expires_seconds: 60,
            use_proxy_ndp: true,
            phase2_strict_id_v6: false,
        }
    }

    #[test]
    fn receive_ether_drops_frames_with_invalid_source_mac() {
        let mut stack = Ipv6Stack::new(MacAddr::new([2, 0, 0, 0, 0, 1]), &sample_config());

        let mut body = vec![0u8; 24];
        body[0] = ICMPV6_TYPE_NEIGHBOR_SOLICITATION;
        body[8..24].copy_from_slice(&stack.local_ip.octets());
        let mut icmp = Icmpv6Packet::new(body, 0).unwrap();
        icmp.set_checksum_ipv6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 9), stack.local_ip);
        let mut ip = Ipv6Packet::build(IpProtocol::IPv6_ICMP, 255, &icmp.into_data());
        ip.set_src_addr(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 9));
        ip.set_dest_addr(stack.local_ip);

        let mut eth = EthernetFrame::empty();
        eth.set_ether_type(ETHER_TYPE_IPV6);
        eth.set_src_mac(MacAddr::new([0; 6])); // zero source MAC: invalid
        eth.set_dest_mac(MacAddr::new([2, 0, 0, 0, 0, 1]));
        eth.set_payload(&ip.into_data());

        let (delivery, replies) = stack.receive_ether(eth.into_data());
        assert!(delivery.is_none());
        assert!(replies.is_empty());
    }

    #[test]
    fn neighbor_solicitation_for_gateway_yields_advertisement() {
        let mut stack = Ipv6Stack::new(MacAddr::new([2, 0, 0, 0, 0, 1]), &sample_config());

        let mut body = vec![0u8; 24];
        body[0] = ICMPV6_TYPE_NEIGHBOR_SOLICITATION;
        body[8..24].copy_from_slice(&stack.local_ip.octets());
        let icmp = Icmpv6Packet::new(body, 0).unwrap();
        let solicitor = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 9);

        let replies = stack.handle_ns(&icmp, solicitor);
        assert_eq!(replies.len(), 1);
    }
}
