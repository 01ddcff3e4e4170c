//! The IPsec SA table: one entry per direction per peer, keyed for
//! egress by "newest established" and for ingress by `(peer, SPI)`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Des,
    TripleDes,
}

impl CipherKind {
    pub fn block_size(self) -> usize {
        8
    }

    pub fn key_len(self) -> usize {
        match self {
            CipherKind::Des => vpn_crypto::des_cbc::DES_KEY_LEN,
            CipherKind::TripleDes => vpn_crypto::des_cbc::TRIPLE_DES_KEY_LEN,
        }
    }
}

/// Fields named directly after spec.md's IPsec SA field list.
pub struct IpsecSa {
    pub peer_addr: IpAddr,
    pub direction: Direction,
    pub spi: u32,
    pub next_iv: [u8; 8],
    pub cipher: CipherKind,
    pub encryption_key: Vec<u8>,
    pub hmac_key: Vec<u8>,
    pub established: Instant,
    pub bytes_transferred: u64,
    pub sequence: u32,
    pub life_seconds: Duration,
    pub life_kilobytes: u64,
    pub deleted: bool,
}

impl IpsecSa {
    pub fn new(
        peer_addr: IpAddr,
        direction: Direction,
        spi: u32,
        initial_iv: [u8; 8],
        cipher: CipherKind,
        encryption_key: Vec<u8>,
        hmac_key: Vec<u8>,
        life_seconds: Duration,
        life_kilobytes: u64,
    ) -> IpsecSa {
        IpsecSa {
            peer_addr,
            direction,
            spi,
            next_iv: initial_iv,
            cipher,
            encryption_key,
            hmac_key,
            established: Instant::now(),
            bytes_transferred: 0,
            sequence: 0,
            life_seconds,
            life_kilobytes,
            deleted: false,
        }
    }

    pub fn is_usable_for_egress(&self) -> bool {
        !self.deleted
    }

    /// True once either lifetime cap is within 10% of exhaustion —
    /// the trigger point for scheduling Phase-2 rekey (spec.md §4.8).
    pub fn approaching_exhaustion(&self) -> bool {
        let time_left = self.life_seconds.checked_sub(self.established.elapsed());
        let time_exhausted = time_left.map(|left| left.as_secs_f64() <= self.life_seconds.as_secs_f64() * 0.1).unwrap_or(true);
        let bytes_exhausted = self.bytes_transferred as f64 >= self.life_kilobytes as f64 * 1024.0 * 0.9;
        time_exhausted || bytes_exhausted
    }

    pub fn is_expired(&self) -> bool {
        self.established.elapsed() >= self.life_seconds || self.bytes_transferred >= self.life_kilobytes * 1024
    }
}

#[derive(Default)]
pub struct SaTable {
    outgoing: Vec<IpsecSa>,
    incoming: HashMap<(IpAddr, u32), IpsecSa>,
}

impl SaTable {
    pub fn new() -> SaTable {
        SaTable { outgoing: Vec::new(), incoming: HashMap::new() }
    }

    pub fn install_outgoing(&mut self, sa: IpsecSa) {
        self.outgoing.push(sa);
    }

    pub fn install_incoming(&mut self, sa: IpsecSa) {
        self.incoming.insert((sa.peer_addr, sa.spi), sa);
    }

    /// The newest established, non-deleted outgoing SA for `peer` —
    /// "newest" meaning latest `established` tick, matching spec.md's
    /// egress-selection rule.
    pub fn select_outgoing(&mut self, peer: IpAddr) -> Option<&mut IpsecSa> {
        self.outgoing
            .iter_mut()
            .filter(|sa| sa.peer_addr == peer && sa.is_usable_for_egress())
            .max_by_key(|sa| sa.established)
    }

    pub fn lookup_incoming(&mut self, peer: IpAddr, spi: u32) -> Option<&mut IpsecSa> {
        self.incoming.get_mut(&(peer, spi))
    }

    pub fn mark_outgoing_deleted(&mut self, peer: IpAddr, spi: u32) {
        for sa in self.outgoing.iter_mut().filter(|sa| sa.peer_addr == peer && sa.spi == spi) {
            sa.deleted = true;
        }
    }

    /// SPIs of every outgoing SA to `peer` still usable for egress, for
    /// emitting Delete payloads before superseding or tearing them down.
    pub fn live_outgoing_spis(&self, peer: IpAddr) -> Vec<u32> {
        self.outgoing.iter().filter(|sa| sa.peer_addr == peer && sa.is_usable_for_egress()).map(|sa| sa.spi).collect()
    }

    /// Drops outgoing SAs whose lifetime has fully expired, regardless
    /// of whether they were ever explicitly marked deleted.
    pub fn sweep_expired_outgoing(&mut self) {
        self.outgoing.retain(|sa| !sa.is_expired());
    }

    pub fn outgoing_needing_rekey(&self, peer: IpAddr) -> Option<&IpsecSa> {
        self.outgoing.iter().find(|sa| sa.peer_addr == peer && sa.is_usable_for_egress() && sa.approaching_exhaustion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_sa(spi: u32) -> IpsecSa {
        IpsecSa::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            Direction::Outgoing,
            spi,
            [0u8; 8],
            CipherKind::Des,
            vec![1u8; 8],
            vec![2u8; 20],
            Duration::from_secs(3600),
            100_000,
        )
    }

    #[test]
    fn select_outgoing_picks_newest() {
        let mut table = SaTable::new();
        table.install_outgoing(sample_sa(1));
        std::thread::sleep(Duration::from_millis(2));
        table.install_outgoing(sample_sa(2));
        let chosen = table.select_outgoing(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        assert_eq!(chosen.spi, 2);
    }

    #[test]
    fn deleted_sa_is_excluded_from_egress_selection() {
        let mut table = SaTable::new();
        let mut sa = sample_sa(1);
        sa.deleted = true;
        table.install_outgoing(sa);
        assert!(table.select_outgoing(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).is_none());
    }

    #[test]
    fn sweep_evicts_expired_outgoing_sas_even_when_never_marked_deleted() {
        let mut table = SaTable::new();
        let mut sa = sample_sa(1);
        sa.life_seconds = Duration::from_millis(1);
        table.install_outgoing(sa);
        std::thread::sleep(Duration::from_millis(5));
        table.sweep_expired_outgoing();
        assert!(table.select_outgoing(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).is_none());
    }

    #[test]
    fn live_outgoing_spis_excludes_already_deleted_entries() {
        let mut table = SaTable::new();
        table.install_outgoing(sample_sa(1));
        let mut deleted = sample_sa(2);
        deleted.deleted = true;
        table.install_outgoing(deleted);
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(table.live_outgoing_spis(peer), vec![1]);
    }

    #[test]
    fn incoming_lookup_is_keyed_by_peer_and_spi() {
        let mut table = SaTable::new();
        let mut sa = sample_sa(9);
        sa.direction = Direction::Incoming;
        let peer = sa.peer_addr;
        table.install_incoming(sa);
        assert!(table.lookup_incoming(peer, 9).is_some());
        assert!(table.lookup_incoming(peer, 10).is_none());
    }
}
