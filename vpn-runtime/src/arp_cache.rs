//! IPv4 ARP cache plus the two wait-lists spec.md describes: an ARP
//! wait-list (retry count per unresolved IP) and an IP wait-list (queued
//! datagrams waiting on resolution).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use vpn_packets::MacAddr;

const ARP_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const ARP_MAX_RETRIES: u8 = 5;

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    mac: MacAddr,
    expiry: Instant,
}

pub struct ArpWaitEntry {
    pub last_attempt: Instant,
    pub retries: u8,
}

/// A datagram queued behind an unresolved ARP lookup.
pub struct PendingDatagram {
    pub dest: Ipv4Addr,
    pub packet: Vec<u8>,
    pub deadline: Instant,
}

pub struct ArpCache {
    default_lifetime: Duration,
    dont_update_expires: bool,
    entries: BTreeMap<Ipv4Addr, ArpEntry>,
    arp_waits: BTreeMap<Ipv4Addr, ArpWaitEntry>,
    ip_waits: Vec<PendingDatagram>,
}

impl ArpCache {
    pub fn new(default_lifetime: Duration, dont_update_expires: bool) -> ArpCache {
        ArpCache {
            default_lifetime,
            dont_update_expires,
            entries: BTreeMap::new(),
            arp_waits: BTreeMap::new(),
            ip_waits: Vec::new(),
        }
    }

    pub fn lookup(&mut self, ip: Ipv4Addr) -> Option<MacAddr> {
        let lifetime = self.default_lifetime;
        let dont_update = self.dont_update_expires;
        self.entries.get_mut(&ip).map(|entry| {
            if !dont_update {
                entry.expiry = Instant::now() + lifetime;
            }
            entry.mac
        })
    }

    /// Installs/refreshes a resolved mapping and drains any IP-waits now
    /// satisfied by it, returning the datagrams ready to send.
    pub fn resolve(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Vec<Vec<u8>> {
        self.entries.insert(ip, ArpEntry { mac, expiry: Instant::now() + self.default_lifetime });
        self.arp_waits.remove(&ip);

        let (ready, pending): (Vec<_>, Vec<_>) = self.ip_waits.drain(..).partition(|w| w.dest == ip);
        self.ip_waits = pending;
        ready.into_iter().map(|w| w.packet).collect()
    }

    /// Enqueues a datagram behind an ARP resolution, registering (or
    /// refreshing) the ARP wait entry so the caller knows whether to
    /// (re)send a request.
    pub fn wait_for(&mut self, dest: Ipv4Addr, packet: Vec<u8>, queue_timeout: Duration) {
        self.ip_waits.push(PendingDatagram { dest, packet, deadline: Instant::now() + queue_timeout });
        self.arp_waits.entry(dest).or_insert(ArpWaitEntry { last_attempt: Instant::now() - ARP_RETRY_INTERVAL, retries: 0 });
    }

    /// IPs that need a fresh ARP request sent right now (retry interval
    /// elapsed and retries remain). Entries past the retry cap are
    /// dropped along with their queued datagrams.
    pub fn due_for_retry(&mut self) -> Vec<Ipv4Addr> {
        let now = Instant::now();
        let mut due = Vec::new();
        self.arp_waits.retain(|ip, wait| {
            if wait.retries >= ARP_MAX_RETRIES {
                return false;
            }
            if now.duration_since(wait.last_attempt) >= ARP_RETRY_INTERVAL {
                wait.last_attempt = now;
                wait.retries += 1;
                due.push(*ip);
            }
            true
        });
        let arp_waits = &self.arp_waits;
        self.ip_waits.retain(|w| arp_waits.contains_key(&w.dest));
        due
    }

    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expiry > now);
        self.ip_waits.retain(|w| w.deadline > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_refreshes_expiry_unless_dont_update() {
        let mut cache = ArpCache::new(Duration::from_secs(60), false);
        cache.resolve(Ipv4Addr::new(10, 0, 0, 1), MacAddr::new([1; 6]));
        assert_eq!(cache.lookup(Ipv4Addr::new(10, 0, 0, 1)), Some(MacAddr::new([1; 6])));
    }

    #[test]
    fn resolve_drains_matching_ip_waits() {
        let mut cache = ArpCache::new(Duration::from_secs(60), false);
        cache.wait_for(Ipv4Addr::new(10, 0, 0, 5), vec![1, 2, 3], Duration::from_secs(10));
        cache.wait_for(Ipv4Addr::new(10, 0, 0, 6), vec![4, 5, 6], Duration::from_secs(10));
        let ready = cache.resolve(Ipv4Addr::new(10, 0, 0, 5), MacAddr::new([2; 6]));
        assert_eq!(ready, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn due_for_retry_caps_at_five() {
        let mut cache = ArpCache::new(Duration::from_secs(60), false);
        cache.wait_for(Ipv4Addr::new(10, 0, 0, 9), vec![9], Duration::from_secs(10));
        for wait in cache.arp_waits.values_mut() {
            wait.last_attempt = Instant::now() - Duration::from_secs(2);
            wait.retries = ARP_MAX_RETRIES;
        }
        assert!(cache.due_for_retry().is_empty());
    }
}
