//! The virtual router: dispatches parsed guest-side traffic between the
//! per-protocol stacks, clamps TCP MSS, and originates the tunnel
//! keepalive ping. Physical-side IKE/ESP traffic and the IPsec SA table
//! are owned by [`crate::engine`]; this module only ever sees the
//! guest-facing virtual NIC.

use std::convert::TryFrom;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use vpn_packets::{
    IcmpPacket, IpProtocol, Ipv4Packet, MacAddr, TcpSegment, ICMP_TYPE_ECHO_REQUEST,
    TCP_OPTION_KIND_MSS,
};

use crate::config::{RouterMode, VpnConfig};
use crate::ipv4_stack::{Delivery as V4Delivery, Ipv4Stack};
use crate::ipv6_stack::{Delivery as V6Delivery, Ipv6Stack};

/// What a guest-originated Ethernet frame resolved to.
#[derive(Default)]
pub struct GuestReceive {
    /// Reply frames to send straight back out the virtual NIC (ARP/DHCP/NDP/RA).
    pub to_guest: Vec<Vec<u8>>,
    /// A full IPv4 datagram that needs to leave toward the peer — either
    /// NATted onto the physical link (`L3Trans`) or handed to the IPsec
    /// engine (`L3IPsec`).
    pub tunnel_v4: Option<Vec<u8>>,
    pub tunnel_v6: Option<Vec<u8>>,
}

pub struct Router {
    mode: RouterMode,
    guest_v4: Option<Ipv4Stack>,
    guest_v6: Option<Ipv6Stack>,
    mss_clamp: Option<u16>,
    ping_target: Option<Ipv4Addr>,
    ping_interval: Duration,
    ping_msg_size: usize,
    ping_seq: u16,
    next_ping: Instant,
}

impl Router {
    pub fn new(config: &VpnConfig, virt_mac: MacAddr) -> Router {
        let (guest_v4, mss_clamp) = match (&config.v4, config.mode) {
            (Some(v4), RouterMode::L2Trans) => (None, None),
            (Some(v4), _) => (Some(Ipv4Stack::new(virt_mac, v4)), v4.adjust_tcp_mss),
            (None, _) => (None, None),
        };
        let guest_v6 = match (&config.v6, config.mode) {
            (Some(v6), RouterMode::L2Trans) => None,
            (Some(v6), _) => Some(Ipv6Stack::new(virt_mac, v6)),
            (None, _) => None,
        };

        Router {
            mode: config.mode,
            guest_v4,
            guest_v6,
            mss_clamp,
            ping_target: config.vpn_ping_target,
            ping_interval: config.ping_interval(),
            ping_msg_size: config.vpn_ping_msg_size,
            ping_seq: 0,
            next_ping: Instant::now() + config.ping_interval(),
        }
    }

    pub fn mode(&self) -> RouterMode {
        self.mode
    }

    /// Handles one Ethernet frame arriving on the virtual (guest-facing)
    /// NIC. In `L2Trans` mode the caller is expected to forward the raw
    /// frame itself; this only applies once stacks are active.
    pub fn receive_from_guest(&mut self, frame: Vec<u8>) -> GuestReceive {
        let mut out = GuestReceive::default();
        match ether_type(&frame) {
            Some(vpn_packets::ETHER_TYPE_ARP) | Some(vpn_packets::ETHER_TYPE_IPV4) => {
                if let Some(stack) = &mut self.guest_v4 {
                    let (delivery, replies) = stack.receive_ether(frame);
                    out.to_guest.extend(replies);
                    if let Some(datagram) = delivery.and_then(|d| self.datagram_bytes_v4(d)) {
                        out.tunnel_v4 = Some(datagram);
                    }
                }
            }
            Some(vpn_packets::ETHER_TYPE_IPV6) => {
                if let Some(stack) = &mut self.guest_v6 {
                    let (delivery, replies) = stack.receive_ether(frame);
                    out.to_guest.extend(replies);
                    if let Some(V6Delivery::RawIp(packet)) = delivery {
                        out.tunnel_v6 = Some(packet.into_data());
                    }
                }
            }
            _ => {}
        }
        out
    }

    fn datagram_bytes_v4(&self, delivery: V4Delivery) -> Option<Vec<u8>> {
        let raw = match delivery {
            V4Delivery::RawIp(packet) => packet.into_data(),
            V4Delivery::Icmp(icmp) => icmp.into_data(),
            V4Delivery::Udp(udp) => udp.into_data(),
        };
        Some(self.maybe_clamp_mss(raw))
    }

    /// Clamps the MSS option on an outbound TCP SYN/SYN-ACK if
    /// `AdjustTcpMssV4` is configured, recomputing both checksums.
    fn maybe_clamp_mss(&self, raw: Vec<u8>) -> Vec<u8> {
        let mss = match self.mss_clamp {
            Some(m) => m,
            None => return raw,
        };
        let packet = match Ipv4Packet::new(raw.clone(), 0) {
            Ok(p) => p,
            Err(_) => return raw,
        };
        if packet.protocol() != IpProtocol::TCP {
            return raw;
        }
        let src = packet.src_addr();
        let dest = packet.dest_addr();
        let ttl = packet.ttl();
        let mut tcp = match TcpSegment::try_from(packet) {
            Ok(t) => t,
            Err(_) => return raw,
        };
        if !tcp.is_syn() || !tcp.clamp_mss(mss) {
            return raw;
        }
        tcp.set_checksum_ipv4(src, dest);
        let mut rebuilt = Ipv4Packet::build(IpProtocol::TCP, ttl, &tcp.into_data());
        rebuilt.set_src_addr(src);
        rebuilt.set_dest_addr(dest);
        rebuilt.set_checksum();
        rebuilt.into_data()
    }

    /// Delivers a datagram decapsulated from the tunnel (or, in
    /// `L3Trans` mode, arriving un-encrypted on the physical side) to
    /// the guest-facing virtual NIC.
    pub fn deliver_to_guest_v4(&mut self, datagram: Vec<u8>) -> Vec<Vec<u8>> {
        let stack = match &mut self.guest_v4 {
            Some(s) => s,
            None => return Vec::new(),
        };
        let packet = match Ipv4Packet::new(datagram, 0) {
            Ok(p) => p,
            Err(_) => return Vec::new(),
        };
        let (delivery, mut frames) = stack.deliver_from_tunnel(packet);
        let raw = match delivery {
            Some(V4Delivery::RawIp(p)) => Some(p.into_data()),
            Some(V4Delivery::Icmp(i)) => Some(i.into_data()),
            Some(V4Delivery::Udp(u)) => Some(u.into_data()),
            None => None,
        };
        if let Some(raw) = raw.and_then(|bytes| Ipv4Packet::new(bytes, 0).ok()) {
            frames.extend(stack.send_raw_ip(raw));
        }
        frames
    }

    pub fn deliver_to_guest_v6(&mut self, datagram: Vec<u8>) -> Vec<Vec<u8>> {
        let stack = match &mut self.guest_v6 {
            Some(s) => s,
            None => return Vec::new(),
        };
        let packet = match vpn_packets::Ipv6Packet::new(datagram, 0) {
            Ok(p) => p,
            Err(_) => return Vec::new(),
        };
        let (delivery, mut frames) = stack.deliver_from_tunnel(packet);
        let raw = match delivery {
            Some(V6Delivery::RawIp(p)) => Some(p.into_data()),
            Some(V6Delivery::Icmp(i)) => Some(i.into_data()),
            Some(V6Delivery::Udp(u)) => Some(u.into_data()),
            None => None,
        };
        if let Some(raw) = raw.and_then(|bytes| vpn_packets::Ipv6Packet::new(bytes, 0).ok()) {
            frames.extend(stack.send_raw_ip(raw));
        }
        frames
    }

    /// Builds the next periodic keepalive ping, if one is due, as a raw
    /// IPv4 datagram (not yet ARP-resolved or encrypted — the caller
    /// feeds it through whichever egress path the router mode uses).
    pub fn due_keepalive(&mut self) -> Option<Vec<u8>> {
        let target = self.ping_target?;
        if Instant::now() < self.next_ping {
            return None;
        }
        self.next_ping = Instant::now() + self.ping_interval;
        let src = self.guest_v4.as_ref()?.local_ip;
        self.ping_seq = self.ping_seq.wrapping_add(1);
        let payload = vec![0xA5u8; self.ping_msg_size];
        let icmp = IcmpPacket::build_echo(ICMP_TYPE_ECHO_REQUEST, 0xC0DE, self.ping_seq, &payload);
        let mut ip = Ipv4Packet::build(IpProtocol::ICMP, 64, &icmp.into_data());
        ip.set_src_addr(src);
        ip.set_dest_addr(target);
        ip.set_checksum();
        Some(ip.into_data())
    }

    pub fn on_tick(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        if let Some(stack) = &mut self.guest_v4 {
            frames.extend(stack.on_tick());
        }
        if let Some(stack) = &mut self.guest_v6 {
            frames.extend(stack.on_tick());
        }
        frames
    }
}

fn ether_type(frame: &[u8]) -> Option<u16> {
    if frame.len() < 14 {
        None
    } else {
        Some(u16::from_be_bytes([frame[12], frame[13]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CryptoAlgo, Phase1Mode, V4Config, VpnAuthMethod};

    fn sample_config() -> VpnConfig {
        VpnConfig {
            mode: RouterMode::L3IPsec,
            virtual_gateway_mac: [0x02, 0, 0, 0, 0, 1],
            v4: Some(V4Config {
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
                adjust_tcp_mss: Some(1360),
                use_proxy_arp: true,
            }),
            v6: None,
            vpn_gateway_address: Ipv4Addr::new(203, 0, 113, 1),
            vpn_auth_method: VpnAuthMethod::Password,
            vpn_password: Some("secret".into()),
            vpn_id_string: "client".into(),
            vpn_cert_name: None,
            vpn_ca_cert_name: None,
            vpn_rsa_key_name: None,
            vpn_specify_issuer: false,
            vpn_phase1_mode: Phase1Mode::Main,
            vpn_phase1_crypto: CryptoAlgo::DesCbc,
            vpn_phase2_crypto: CryptoAlgo::DesCbc,
            vpn_phase1_life_seconds: 28800,
            vpn_phase1_life_kilobytes: 0,
            vpn_phase2_life_seconds: 3600,
            vpn_phase2_life_kilobytes: 500_000,
            vpn_wait_phase2_blank_span_ms: 500,
            vpn_connect_timeout_ms: 30_000,
            vpn_idle_timeout_seconds: 300,
            vpn_ping_target: Some(Ipv4Addr::new(10, 0, 0, 1)),
            vpn_ping_interval_seconds: 30,
            vpn_ping_msg_size: 32,
            vpn_phase1_aggressive_cleartext_hash: false,
        }
    }

    #[test]
    fn keepalive_is_not_due_immediately_after_construction() {
        let mut router = Router::new(&sample_config(), MacAddr::new([2, 0, 0, 0, 0, 1]));
        assert!(router.due_keepalive().is_none());
    }

    #[test]
    fn mss_clamp_rewrites_syn_option_and_checksum() {
        let router = Router::new(&sample_config(), MacAddr::new([2, 0, 0, 0, 0, 1]));
        let mut raw = vec![0u8; 24];
        raw[0..2].copy_from_slice(&12345u16.to_be_bytes());
        raw[2..4].copy_from_slice(&80u16.to_be_bytes());
        raw[12] = 6 << 4; // data offset: 24 bytes / 4
        raw[13] = 0x02; // SYN
        raw[20] = TCP_OPTION_KIND_MSS;
        raw[21] = 4;
        raw[22..24].copy_from_slice(&1400u16.to_be_bytes());
        let mut tcp = TcpSegment::new(raw, 0).unwrap();
        tcp.set_checksum_ipv4(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(93, 184, 216, 34));
        let mut ip = Ipv4Packet::build(IpProtocol::TCP, 64, &tcp.into_data());
        ip.set_src_addr(Ipv4Addr::new(10, 0, 0, 2));
        ip.set_dest_addr(Ipv4Addr::new(93, 184, 216, 34));
        ip.set_checksum();

        let clamped = router.maybe_clamp_mss(ip.into_data());
        let packet = Ipv4Packet::new(clamped, 0).unwrap();
        assert!(packet.validate_checksum());
        let segment = TcpSegment::try_from(packet).unwrap();
        assert_eq!(segment.mss(), Some(1360));
    }
}
