//! IPv4 stack: ARP resolution, fragmentation/reassembly, ICMP echo, UDP,
//! and the DHCP server, driving the owned packet types in `vpn-packets`.

use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, warn};
use vpn_packets::{
    ArpFrame, ArpHardwareType, ArpOp, DhcpMessage, EthernetFrame, IcmpPacket, IpProtocol,
    Ipv4Packet, MacAddr, UdpSegment, ETHER_TYPE_ARP, ETHER_TYPE_IPV4, ICMP_TYPE_ECHO_REQUEST,
};
use std::convert::TryFrom;

use crate::arp_cache::ArpCache;
use crate::config::V4Config;
use crate::dhcp_server::DhcpServer;
use crate::reassembly::{ReassemblyKey, ReassemblyTable};

const ARP_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const FRAGMENT_ALIGN: usize = 8;

pub struct Ipv4Stack {
    pub local_mac: MacAddr,
    pub local_ip: Ipv4Addr,
    pub mtu: u16,
    use_proxy_arp: bool,
    proxy_arp_exception: Ipv4Addr,
    arp_cache: ArpCache,
    reassembly: ReassemblyTable,
    dhcp: Option<DhcpServer>,
    id_seed: u16,
    pub changed: bool,
}

/// A fully reassembled (or un-fragmented) IPv4 datagram ready for
/// protocol dispatch.
pub enum Delivery {
    Icmp(IcmpPacket),
    Udp(UdpSegment),
    RawIp(Ipv4Packet),
}

impl Ipv4Stack {
    pub fn new(local_mac: MacAddr, config: &V4Config) -> Ipv4Stack {
        let dhcp = if config.dhcp_enabled { Some(DhcpServer::new(config)) } else { None };
        Ipv4Stack {
            local_mac,
            local_ip: config.guest_virtual_gateway,
            mtu: config.guest_mtu,
            use_proxy_arp: config.use_proxy_arp,
            proxy_arp_exception: config.guest_ip,
            arp_cache: ArpCache::new(
                Duration::from_secs(config.arp_expires_seconds),
                config.arp_dont_update_expires,
            ),
            reassembly: ReassemblyTable::new(),
            dhcp,
            id_seed: 1,
            changed: false,
        }
    }

    fn next_identification(&mut self) -> u16 {
        let id = self.id_seed;
        self.id_seed = self.id_seed.wrapping_add(1);
        id
    }

    /// Handles one ingress Ethernet frame whose payload is ARP or IPv4.
    /// Returns a completed protocol delivery, if any, plus any reply
    /// frames to send immediately (ARP replies, DHCP offers/acks, ICMP
    /// echo replies).
    pub fn receive_ether(&mut self, frame: Vec<u8>) -> (Option<Delivery>, Vec<Vec<u8>>) {
        if let Err(reason) = crate::parser::parse(&frame, self.local_mac) {
            debug!("dropping Ethernet frame: {}", reason);
            return (None, Vec::new());
        }
        let ethernet = match EthernetFrame::new(frame) {
            Ok(f) => f,
            Err(_) => return (None, Vec::new()),
        };

        match ethernet.ether_type() {
            ETHER_TYPE_ARP => (None, self.handle_arp(ethernet)),
            ETHER_TYPE_IPV4 => self.handle_ipv4(ethernet),
            _ => (None, Vec::new()),
        }
    }

    fn handle_arp(&mut self, ethernet: EthernetFrame) -> Vec<Vec<u8>> {
        let arp = match ArpFrame::try_from(ethernet) {
            Ok(a) => a,
            Err(_) => return Vec::new(),
        };

        let sender_mac = match MacAddr::from_slice(arp.sender_hardware_addr()) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };

        if arp.opcode() == ArpOp::Reply as u16 {
            let ip = arp.sender_ipv4_addr();
            let ready = self.arp_cache.resolve(ip, sender_mac);
            self.changed = self.changed || !ready.is_empty();
            return ready;
        }

        if arp.opcode() != ArpOp::Request as u16 {
            return Vec::new();
        }

        let target = arp.target_ipv4_addr();
        let should_reply = target == self.local_ip
            || (self.use_proxy_arp && target != self.proxy_arp_exception);
        if !should_reply {
            return Vec::new();
        }

        let mut reply = ArpFrame::new_ipv4();
        reply.set_opcode(ArpOp::Reply as u16);
        reply.set_sender_hardware_addr(self.local_mac);
        reply.set_sender_ipv4_addr(target);
        reply.set_target_hardware_addr(sender_mac);
        reply.set_target_protocol_addr(std::net::IpAddr::V4(arp.sender_ipv4_addr()));

        let mut eth = reply.frame();
        eth.set_dest_mac(sender_mac);
        eth.set_src_mac(self.local_mac);
        vec![eth.into_data()]
    }

    fn handle_ipv4(&mut self, ethernet: EthernetFrame) -> (Option<Delivery>, Vec<Vec<u8>>) {
        let packet = match Ipv4Packet::new(ethernet.data, ethernet.payload_offset) {
            Ok(p) => p,
            Err(_) => return (None, Vec::new()),
        };
        if !packet.validate_checksum() {
            warn!("dropping IPv4 packet with bad header checksum");
            return (None, Vec::new());
        }

        let (more_fragments, datagram) = self.reassemble_if_needed(packet);
        let packet = match datagram {
            Some(p) => p,
            None => {
                debug!("fragment buffered, more_fragments={}", more_fragments);
                return (None, Vec::new());
            }
        };

        self.dispatch(packet)
    }

    /// If unfragmented, returns it immediately. Otherwise feeds the
    /// reassembler and returns the completed datagram once all
    /// fragments have arrived.
    fn reassemble_if_needed(&mut self, packet: Ipv4Packet) -> (bool, Option<Ipv4Packet>) {
        let (_, more_fragments) = packet.flags();
        if !more_fragments && packet.fragment_offset() == 0 {
            return (false, Some(packet));
        }

        let key = ReassemblyKey {
            src: std::net::IpAddr::V4(packet.src_addr()),
            dst: std::net::IpAddr::V4(packet.dest_addr()),
            identification: packet.identification() as u32,
            protocol: packet.protocol().as_u8(),
        };
        let offset = packet.fragment_offset() as usize * FRAGMENT_ALIGN;
        let protocol = packet.protocol();
        let ttl = packet.ttl();
        let payload = packet.payload().to_vec();

        match self.reassembly.accept_fragment(
            key,
            offset,
            &payload,
            more_fragments,
            protocol,
            ttl,
            false,
        ) {
            Some(full_payload) => {
                let mut rebuilt = Ipv4Packet::build(protocol, ttl, &full_payload);
                rebuilt.set_src_addr(packet.src_addr());
                rebuilt.set_dest_addr(packet.dest_addr());
                rebuilt.set_checksum();
                (more_fragments, Some(rebuilt))
            }
            None => (more_fragments, None),
        }
    }

    fn dispatch(&mut self, packet: Ipv4Packet) -> (Option<Delivery>, Vec<Vec<u8>>) {
        match packet.protocol() {
            IpProtocol::ICMP => match IcmpPacket::try_from(packet) {
                Ok(icmp) => (Some(Delivery::Icmp(icmp)), Vec::new()),
                Err(_) => (None, Vec::new()),
            },
            IpProtocol::UDP => {
                let src_ip = packet.src_addr();
                match UdpSegment::try_from(packet) {
                    Ok(segment) if segment.dest_port() == 67 || segment.dest_port() == 68 => {
                        self.handle_dhcp(segment, src_ip)
                    }
                    Ok(segment) => (Some(Delivery::Udp(segment)), Vec::new()),
                    Err(_) => (None, Vec::new()),
                }
            }
            _ => (Some(Delivery::RawIp(packet)), Vec::new()),
        }
    }

    fn handle_dhcp(&mut self, segment: UdpSegment, _src_ip: Ipv4Addr) -> (Option<Delivery>, Vec<Vec<u8>>) {
        let dhcp_server = match &mut self.dhcp {
            Some(server) => server,
            None => return (None, Vec::new()),
        };
        let request = match DhcpMessage::new(segment.payload().to_vec()) {
            Ok(msg) => msg,
            Err(_) => return (None, Vec::new()),
        };
        let reply = match dhcp_server.handle(&request) {
            Some(reply) => reply,
            None => return (None, Vec::new()),
        };

        let client_mac = reply.chaddr();
        let mut udp = UdpSegment::build(67, 68, &reply.into_data());
        udp.set_checksum_ipv4(self.local_ip, Ipv4Addr::new(255, 255, 255, 255));
        let mut ip = Ipv4Packet::build(IpProtocol::UDP, 64, &udp.into_data());
        ip.set_src_addr(self.local_ip);
        ip.set_dest_addr(Ipv4Addr::new(255, 255, 255, 255));
        ip.set_checksum();

        let mut eth = EthernetFrame::empty();
        eth.set_ether_type(ETHER_TYPE_IPV4);
        eth.set_src_mac(self.local_mac);
        eth.set_dest_mac(client_mac);
        eth.set_payload(&ip.into_data());

        self.changed = true;
        (None, vec![eth.into_data()])
    }

    /// Builds an Ethernet-framed IPv4 datagram and either sends it
    /// immediately (ARP hit) or queues it behind resolution.
    pub fn send_ip(
        &mut self,
        dest: Ipv4Addr,
        protocol: IpProtocol,
        ttl: u8,
        payload: &[u8],
    ) -> Vec<Vec<u8>> {
        let mut packet = Ipv4Packet::build(protocol, ttl, payload);
        packet.set_src_addr(self.local_ip);
        packet.set_dest_addr(dest);
        let id = self.next_identification();
        packet.set_identification(id);
        packet.set_checksum();
        self.send_raw_ip(packet)
    }

    pub fn send_udp(&mut self, dest: Ipv4Addr, src_port: u16, dest_port: u16, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut udp = UdpSegment::build(src_port, dest_port, payload);
        udp.set_checksum_ipv4(self.local_ip, dest);
        self.send_ip(dest, IpProtocol::UDP, 64, &udp.into_data())
    }

    pub fn send_icmp_echo_request(&mut self, dest: Ipv4Addr, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<Vec<u8>> {
        let icmp = IcmpPacket::build_echo(ICMP_TYPE_ECHO_REQUEST, identifier, sequence, payload);
        self.send_ip(dest, IpProtocol::ICMP, 64, &icmp.into_data())
    }

    pub fn send_icmp_echo_response(&mut self, dest: Ipv4Addr, reply: IcmpPacket) -> Vec<Vec<u8>> {
        self.send_ip(dest, IpProtocol::ICMP, 64, &reply.into_data())
    }

    /// Hands a prebuilt IPv4 packet to the fragmentation-and-ARP path.
    /// Fragments on `mtu` at 8-byte-aligned boundaries, sharing one
    /// identification across the fragment set.
    pub fn send_raw_ip(&mut self, packet: Ipv4Packet) -> Vec<Vec<u8>> {
        let dest = packet.dest_addr();
        let mac = match self.arp_cache.lookup(dest) {
            Some(mac) => mac,
            None => {
                self.arp_cache.wait_for(dest, packet.into_data(), ARP_WAIT_TIMEOUT);
                self.changed = true;
                return self.broadcast_arp_request(dest);
            }
        };

        let mtu = self.mtu as usize;
        let total_len = packet.total_len() as usize;
        if total_len <= mtu {
            return vec![self.frame_for(mac, packet.into_data())];
        }

        self.fragment(packet, mtu)
            .into_iter()
            .map(|frag| self.frame_for(mac, frag))
            .collect()
    }

    fn fragment(&self, packet: Ipv4Packet, mtu: usize) -> Vec<Vec<u8>> {
        let header_len = packet.header_len();
        let protocol = packet.protocol();
        let ttl = packet.ttl();
        let id = packet.identification();
        let src = packet.src_addr();
        let dest = packet.dest_addr();
        let payload = packet.payload().to_vec();

        let max_payload_per_frag = ((mtu - header_len) / FRAGMENT_ALIGN) * FRAGMENT_ALIGN;
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + max_payload_per_frag).min(payload.len());
            let more_fragments = end < payload.len();
            let mut frag = Ipv4Packet::build(protocol, ttl, &payload[offset..end]);
            frag.set_src_addr(src);
            frag.set_dest_addr(dest);
            frag.set_identification(id);
            frag.set_fragment_fields(more_fragments, (offset / FRAGMENT_ALIGN) as u16);
            frag.set_checksum();
            frames.push(frag.into_data());
            offset = end;
        }
        frames
    }

    fn frame_for(&self, dest_mac: MacAddr, ip_payload: Vec<u8>) -> Vec<u8> {
        let mut eth = EthernetFrame::empty();
        eth.set_ether_type(ETHER_TYPE_IPV4);
        eth.set_src_mac(self.local_mac);
        eth.set_dest_mac(dest_mac);
        eth.set_payload(&ip_payload);
        eth.into_data()
    }

    fn broadcast_arp_request(&self, target: Ipv4Addr) -> Vec<Vec<u8>> {
        let mut arp = ArpFrame::new_ipv4();
        arp.set_opcode(ArpOp::Request as u16);
        arp.set_hardware_type(ArpHardwareType::Ethernet as u16);
        arp.set_sender_hardware_addr(self.local_mac);
        arp.set_sender_ipv4_addr(self.local_ip);
        arp.set_target_ipv4_addr(target);

        let mut eth = arp.frame();
        eth.set_src_mac(self.local_mac);
        eth.set_dest_mac(MacAddr::BROADCAST);
        vec![eth.into_data()]
    }

    /// Re-sends ARP requests for entries past their retry interval and
    /// purges expired cache/reassembly state. Call once per timer tick.
    pub fn on_tick(&mut self) -> Vec<Vec<u8>> {
        self.arp_cache.purge_expired();
        self.reassembly.purge_expired();
        if let Some(dhcp) = &mut self.dhcp {
            dhcp.purge_expired();
        }
        let due = self.arp_cache.due_for_retry();
        due.into_iter().flat_map(|ip| self.broadcast_arp_request(ip)).collect()
    }

    /// Called when an IPv4 datagram arrived as the inner payload of a
    /// decapsulated ESP tunnel; delivered straight to the guest-side
    /// stack without going through the physical-side ARP/fragmentation
    /// path that `send_raw_ip` exists for.
    pub fn deliver_from_tunnel(&mut self, datagram: Ipv4Packet) -> (Option<Delivery>, Vec<Vec<u8>>) {
        self.dispatch(datagram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> V4Config {
        V4Config {
            bind: Ipv4Addr::new(0, 0, 0, 0),
            guest_ip: Ipv4Addr::new(10, 0, 0, 2),
            guest_mtu: 1500,
            guest_virtual_gateway: Ipv4Addr::new(10, 0, 0, 1),
            dhcp_enabled: true,
            dhcp_pool_start: Ipv4Addr::new(10, 0, 0, 2),
            dhcp_pool_end: Ipv4Addr::new(10, 0, 0, 200),
            dhcp_lease_seconds: 3600,
            dhcp_dns: vec![Ipv4Addr::new(8, 8, 8, 8)],
            dhcp_domain: None,
            host_ip: Ipv4Addr::new(192, 168, 1, 50),
            host_mtu: 1500,
            host_ip_default_gateway: Ipv4Addr::new(192, 168, 1, 1),
            arp_expires_seconds: 60,
            arp_dont_update_expires: false,
            adjust_tcp_mss: None,
            use_proxy_arp: true,
        }
    }

    #[test]
    fn receive_ether_drops_frames_with_invalid_source_mac() {
        let mut stack = Ipv4Stack::new(MacAddr::new([2, 0, 0, 0, 0, 1]), &sample_config());

        let mut arp = ArpFrame::new_ipv4();
        arp.set_opcode(ArpOp::Request as u16);
        arp.set_sender_hardware_addr(MacAddr::new([0; 6]));
        arp.set_sender_ipv4_addr(Ipv4Addr::new(10, 0, 0, 50));
        arp.set_target_ipv4_addr(Ipv4Addr::new(10, 0, 0, 5));
        let mut eth = arp.frame();
        eth.set_src_mac(MacAddr::new([0; 6]));
        eth.set_dest_mac(MacAddr::BROADCAST);

        let (delivery, replies) = stack.receive_ether(eth.into_data());
        assert!(delivery.is_none());
        assert!(replies.is_empty());
    }

    #[test]
    fn proxy_arp_answers_for_any_ip_except_the_exception() {
        let mut stack = Ipv4Stack::new(MacAddr::new([2, 0, 0, 0, 0, 1]), &sample_config());

        let mut arp = ArpFrame::new_ipv4();
        arp.set_opcode(ArpOp::Request as u16);
        arp.set_sender_hardware_addr(MacAddr::new([9; 6]));
        arp.set_sender_ipv4_addr(Ipv4Addr::new(10, 0, 0, 50));
        arp.set_target_ipv4_addr(Ipv4Addr::new(10, 0, 0, 5));
        let mut eth = arp.frame();
        eth.set_src_mac(MacAddr::new([9; 6]));
        eth.set_dest_mac(MacAddr::BROADCAST);

        let (_, replies) = stack.receive_ether(eth.into_data());
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn proxy_arp_ignores_the_guest_own_address() {
        let mut stack = Ipv4Stack::new(MacAddr::new([2, 0, 0, 0, 0, 1]), &sample_config());

        let mut arp = ArpFrame::new_ipv4();
        arp.set_opcode(ArpOp::Request as u16);
        arp.set_sender_hardware_addr(MacAddr::new([9; 6]));
        arp.set_sender_ipv4_addr(Ipv4Addr::new(10, 0, 0, 50));
        arp.set_target_ipv4_addr(Ipv4Addr::new(10, 0, 0, 2));
        let mut eth = arp.frame();
        eth.set_src_mac(MacAddr::new([9; 6]));
        eth.set_dest_mac(MacAddr::BROADCAST);

        let (_, replies) = stack.receive_ether(eth.into_data());
        assert!(replies.is_empty());
    }
}
