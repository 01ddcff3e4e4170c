//! IPv6 neighbor cache: same shape as `arp_cache`, keyed on IPv6 and
//! resolved via Neighbor Solicitation/Advertisement instead of ARP.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use vpn_packets::MacAddr;

const NS_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const NS_MAX_RETRIES: u8 = 5;

#[derive(Debug, Clone, Copy)]
struct NeighborEntry {
    mac: MacAddr,
    expiry: Instant,
}

struct NsWaitEntry {
    last_attempt: Instant,
    retries: u8,
}

pub struct PendingDatagram {
    pub dest: Ipv6Addr,
    pub packet: Vec<u8>,
    pub deadline: Instant,
}

pub struct NdpCache {
    default_lifetime: Duration,
    entries: BTreeMap<Ipv6Addr, NeighborEntry>,
    ns_waits: BTreeMap<Ipv6Addr, NsWaitEntry>,
    ip_waits: Vec<PendingDatagram>,
}

impl NdpCache {
    pub fn new(default_lifetime: Duration) -> NdpCache {
        NdpCache {
            default_lifetime,
            entries: BTreeMap::new(),
            ns_waits: BTreeMap::new(),
            ip_waits: Vec::new(),
        }
    }

    pub fn lookup(&mut self, ip: Ipv6Addr) -> Option<MacAddr> {
        let lifetime = self.default_lifetime;
        self.entries.get_mut(&ip).map(|entry| {
            entry.expiry = Instant::now() + lifetime;
            entry.mac
        })
    }

    pub fn resolve(&mut self, ip: Ipv6Addr, mac: MacAddr) -> Vec<Vec<u8>> {
        self.entries.insert(ip, NeighborEntry { mac, expiry: Instant::now() + self.default_lifetime });
        self.ns_waits.remove(&ip);
        let (ready, pending): (Vec<_>, Vec<_>) = self.ip_waits.drain(..).partition(|w| w.dest == ip);
        self.ip_waits = pending;
        ready.into_iter().map(|w| w.packet).collect()
    }

    pub fn wait_for(&mut self, dest: Ipv6Addr, packet: Vec<u8>, queue_timeout: Duration) {
        self.ip_waits.push(PendingDatagram { dest, packet, deadline: Instant::now() + queue_timeout });
        self.ns_waits.entry(dest).or_insert(NsWaitEntry { last_attempt: Instant::now() - NS_RETRY_INTERVAL, retries: 0 });
    }

    pub fn due_for_retry(&mut self) -> Vec<Ipv6Addr> {
        let now = Instant::now();
        let mut due = Vec::new();
        self.ns_waits.retain(|ip, wait| {
            if wait.retries >= NS_MAX_RETRIES {
                return false;
            }
            if now.duration_since(wait.last_attempt) >= NS_RETRY_INTERVAL {
                wait.last_attempt = now;
                wait.retries += 1;
                due.push(*ip);
            }
            true
        });
        let ns_waits = &self.ns_waits;
        self.ip_waits.retain(|w| ns_waits.contains_key(&w.dest));
        due
    }

    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expiry > now);
        self.ip_waits.retain(|w| w.deadline > now);
    }
}

/// Generates an EUI-64 interface identifier from a MAC address, per
/// RFC 4291 appendix A: flip the universal/local bit, insert `FF:FE`.
pub fn eui64_from_mac(mac: MacAddr) -> [u8; 8] {
    let b = mac.bytes;
    [b[0] ^ 0x02, b[1], b[2], 0xFF, 0xFE, b[3], b[4], b[5]]
}

/// Builds a link-local address (`fe80::/64` + EUI-64 identifier) from a
/// MAC address.
pub fn link_local_from_mac(mac: MacAddr) -> Ipv6Addr {
    let iid = eui64_from_mac(mac);
    let mut octets = [0u8; 16];
    octets[0] = 0xfe;
    octets[1] = 0x80;
    octets[8..16].copy_from_slice(&iid);
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eui64_flips_universal_local_bit() {
        let mac = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let iid = eui64_from_mac(mac);
        assert_eq!(iid, [0x02, 0x11, 0x22, 0xFF, 0xFE, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn link_local_has_fe80_prefix() {
        let mac = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let addr = link_local_from_mac(mac);
        assert!(addr.segments()[0] == 0xfe80);
    }

    #[test]
    fn resolve_drains_matching_ip_waits() {
        let mut cache = NdpCache::new(Duration::from_secs(60));
        let dest = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 5);
        cache.wait_for(dest, vec![7, 8, 9], Duration::from_secs(10));
        let ready = cache.resolve(dest, MacAddr::new([3; 6]));
        assert_eq!(ready, vec![vec![7, 8, 9]]);
    }
}
