//! Minimal DHCPv4 server: one lease per client MAC, drawn from the
//! configured pool range, DISCOVER/OFFER and REQUEST/ACK only (no
//! INFORM/DECLINE/RELEASE handling beyond lease removal).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use vpn_packets::{
    DhcpMessage, DhcpMessageType, MacAddr, OPT_DOMAIN_NAME, OPT_DOMAIN_NAME_SERVER,
    OPT_INTERFACE_MTU, OPT_LEASE_TIME, OPT_ROUTER, OPT_SERVER_IDENTIFIER, OPT_SUBNET_MASK,
};

use crate::config::V4Config;

struct Lease {
    ip: Ipv4Addr,
    expiry: Instant,
}

pub struct DhcpServer {
    pool_start: u32,
    pool_end: u32,
    lease_duration: Duration,
    server_ip: Ipv4Addr,
    subnet_mask: Ipv4Addr,
    dns: Vec<Ipv4Addr>,
    domain: Option<String>,
    mtu: u16,
    leases: HashMap<MacAddr, Lease>,
}

impl DhcpServer {
    pub fn new(config: &V4Config) -> DhcpServer {
        DhcpServer {
            pool_start: u32::from(config.dhcp_pool_start),
            pool_end: u32::from(config.dhcp_pool_end),
            lease_duration: Duration::from_secs(config.dhcp_lease_seconds as u64),
            server_ip: config.guest_virtual_gateway,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            dns: config.dhcp_dns.clone(),
            domain: config.dhcp_domain.clone(),
            mtu: config.guest_mtu,
            leases: HashMap::new(),
        }
    }

    fn in_pool(&self, ip: Ipv4Addr) -> bool {
        let v = u32::from(ip);
        v >= self.pool_start && v <= self.pool_end
    }

    fn allocate(&mut self, mac: MacAddr, requested: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
        if let Some(lease) = self.leases.get(&mac) {
            return Some(lease.ip);
        }
        let taken: Vec<Ipv4Addr> = self.leases.values().map(|l| l.ip).collect();
        if let Some(ip) = requested {
            if self.in_pool(ip) && !taken.contains(&ip) {
                return Some(ip);
            }
        }
        (self.pool_start..=self.pool_end)
            .map(Ipv4Addr::from)
            .find(|ip| !taken.contains(ip))
    }

    fn fill_options(&self, msg: &mut DhcpMessage) {
        msg.set_ipv4_option(OPT_SUBNET_MASK, self.subnet_mask);
        msg.set_ipv4_option(OPT_ROUTER, self.server_ip);
        msg.set_ipv4_option(OPT_SERVER_IDENTIFIER, self.server_ip);
        msg.set_u32_option(OPT_LEASE_TIME, self.lease_duration.as_secs() as u32);
        msg.set_u32_option(OPT_INTERFACE_MTU, self.mtu as u32);
        if !self.dns.is_empty() {
            let mut bytes = Vec::with_capacity(self.dns.len() * 4);
            for server in &self.dns {
                bytes.extend_from_slice(&server.octets());
            }
            msg.set_option(OPT_DOMAIN_NAME_SERVER, &bytes);
        }
        if let Some(domain) = &self.domain {
            msg.set_option(OPT_DOMAIN_NAME, domain.as_bytes());
        }
    }

    /// Processes one incoming client message, returning the reply to
    /// send (if any).
    pub fn handle(&mut self, msg: &DhcpMessage) -> Option<DhcpMessage> {
        match msg.message_type()? {
            DhcpMessageType::Discover => self.handle_discover(msg),
            DhcpMessageType::Request => self.handle_request(msg),
            _ => None,
        }
    }

    fn handle_discover(&mut self, msg: &DhcpMessage) -> Option<DhcpMessage> {
        let mac = msg.chaddr();
        let offered = self.allocate(mac, msg.requested_ip())?;
        let mut reply = DhcpMessage::build_reply(
            msg.xid(),
            offered,
            self.server_ip,
            mac,
            DhcpMessageType::Offer,
        );
        self.fill_options(&mut reply);
        Some(reply)
    }

    fn handle_request(&mut self, msg: &DhcpMessage) -> Option<DhcpMessage> {
        let mac = msg.chaddr();
        let requested = msg.requested_ip().or_else(|| {
            let ciaddr = msg.ciaddr();
            if ciaddr != Ipv4Addr::new(0, 0, 0, 0) {
                Some(ciaddr)
            } else {
                None
            }
        })?;
        if !self.in_pool(requested) {
            return None;
        }
        let already_taken_by_other = self
            .leases
            .iter()
            .any(|(owner, lease)| lease.ip == requested && *owner != mac);
        if already_taken_by_other {
            return None;
        }

        self.leases.insert(
            mac,
            Lease { ip: requested, expiry: Instant::now() + self.lease_duration },
        );

        let mut reply =
            DhcpMessage::build_reply(msg.xid(), requested, self.server_ip, mac, DhcpMessageType::Ack);
        self.fill_options(&mut reply);
        Some(reply)
    }

    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.leases.retain(|_, lease| lease.expiry > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpn_packets::{DhcpMessage, OPT_MESSAGE_TYPE};

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

    fn discover(mac: MacAddr) -> DhcpMessage {
        let mut msg = DhcpMessage::build_reply(
            0xdeadbeef,
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(0, 0, 0, 0),
            mac,
            DhcpMessageType::Discover,
        );
        msg.set_option(OPT_MESSAGE_TYPE, &[DhcpMessageType::Discover as u8]);
        msg
    }

    #[test]
    fn discover_yields_offer_from_pool_start() {
        let mut server = DhcpServer::new(&sample_config());
        let mac = MacAddr::new([0x02, 0xAC, 0x00, 0x11, 0x22, 0x33]);
        let offer = server.handle(&discover(mac)).unwrap();
        assert_eq!(offer.yiaddr(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(offer.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(offer.option(OPT_SUBNET_MASK), Some(&[255, 255, 255, 0][..]));
    }

    #[test]
    fn repeated_discover_from_same_mac_yields_same_address() {
        let mut server = DhcpServer::new(&sample_config());
        let mac = MacAddr::new([0x02, 0xAC, 0x00, 0x11, 0x22, 0x33]);
        server.handle(&discover(mac));
        let mut request = discover(mac);
        request.set_option(OPT_MESSAGE_TYPE, &[DhcpMessageType::Request as u8]);
        request.set_ipv4_option(vpn_packets::OPT_REQUESTED_IP, Ipv4Addr::new(10, 0, 0, 2));
        let ack = server.handle(&request).unwrap();
        assert_eq!(ack.yiaddr(), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(ack.message_type(), Some(DhcpMessageType::Ack));
    }
}
