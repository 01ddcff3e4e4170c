//! IP fragment reassembly, shared in shape between IPv4 and IPv6: one
//! entry per `(src, dst, identification, protocol)`, a growable payload
//! buffer, and an ordered fragment-range list. Capped globally so a
//! flood of bogus fragments can't exhaust memory.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use vpn_packets::IpProtocol;

const REASSEMBLY_DEADLINE: Duration = Duration::from_secs(60);
const MAX_BUFFERED_BYTES: usize = 1024 * 1024;
const MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReassemblyKey {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub identification: u32,
    pub protocol: u8,
}

struct FragmentRange {
    offset: usize,
    length: usize,
}

pub struct ReassemblyEntry {
    pub protocol: IpProtocol,
    pub ttl: u8,
    pub is_broadcast: bool,
    target_size: Option<usize>,
    buffer: Vec<u8>,
    ranges: Vec<FragmentRange>,
    created: Instant,
    terminal_seen: bool,
}

impl ReassemblyEntry {
    fn new(protocol: IpProtocol, ttl: u8, is_broadcast: bool) -> ReassemblyEntry {
        ReassemblyEntry {
            protocol,
            ttl,
            is_broadcast,
            target_size: None,
            buffer: Vec::new(),
            ranges: Vec::new(),
            created: Instant::now(),
            terminal_seen: false,
        }
    }

    fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Inserts a fragment. Overlapping ranges overwrite, per spec: later
    /// writes win over earlier ones for the overlapping bytes.
    fn accept(&mut self, offset: usize, data: &[u8], more_fragments: bool) {
        let end = offset + data.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset..end].copy_from_slice(data);
        self.ranges.push(FragmentRange { offset, length: data.len() });
        if !more_fragments {
            self.terminal_seen = true;
            self.target_size = Some(end);
        }
    }

    /// Complete iff a terminal fragment has set the target size and the
    /// union of fragment ranges covers `[0, target_size)`.
    fn is_complete(&self) -> bool {
        let target = match self.target_size {
            Some(t) => t,
            None => return false,
        };
        if !self.terminal_seen {
            return false;
        }
        let mut covered: Vec<(usize, usize)> =
            self.ranges.iter().map(|r| (r.offset, r.offset + r.length)).collect();
        covered.sort_unstable();
        let mut cursor = 0usize;
        for (start, end) in covered {
            if start > cursor {
                return false;
            }
            cursor = cursor.max(end);
        }
        cursor >= target
    }

    fn is_expired(&self) -> bool {
        self.created.elapsed() > REASSEMBLY_DEADLINE
    }
}

#[derive(Default)]
pub struct ReassemblyTable {
    entries: Vec<(ReassemblyKey, ReassemblyEntry)>,
}

impl ReassemblyTable {
    pub fn new() -> ReassemblyTable {
        ReassemblyTable { entries: Vec::new() }
    }

    fn total_buffered(&self) -> usize {
        self.entries.iter().map(|(_, e)| e.buffered_len()).sum()
    }

    /// Feeds one fragment in. Returns the reassembled datagram payload
    /// once complete, removing the entry; otherwise `None`.
    pub fn accept_fragment(
        &mut self,
        key: ReassemblyKey,
        offset: usize,
        data: &[u8],
        more_fragments: bool,
        protocol: IpProtocol,
        ttl: u8,
        is_broadcast: bool,
    ) -> Option<Vec<u8>> {
        self.purge_expired();

        if !self.entries.iter().any(|(k, _)| *k == key) {
            if self.entries.len() >= MAX_ENTRIES {
                self.entries.remove(0);
            }
            self.entries.push((key, ReassemblyEntry::new(protocol, ttl, is_broadcast)));
        }

        let idx = self.entries.iter().position(|(k, _)| *k == key).unwrap();
        self.entries[idx].1.accept(offset, data, more_fragments);

        while self.total_buffered() > MAX_BUFFERED_BYTES && self.entries.len() > 1 {
            self.entries.remove(0);
        }

        if self.entries.get(idx).map_or(false, |(_, e)| e.is_complete()) {
            let (_, entry) = self.entries.remove(idx);
            Some(entry.buffer)
        } else {
            None
        }
    }

    pub fn purge_expired(&mut self) {
        self.entries.retain(|(_, entry)| !entry.is_expired());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key() -> ReassemblyKey {
        ReassemblyKey {
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            identification: 42,
            protocol: 17,
        }
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let mut table = ReassemblyTable::new();
        let first = vec![0u8; 1000];
        let second = vec![1u8; 2000];

        assert!(table
            .accept_fragment(key(), 1000, &second, false, IpProtocol::UDP, 64, false)
            .is_none());
        let result = table
            .accept_fragment(key(), 0, &first, true, IpProtocol::UDP, 64, false)
            .unwrap();
        assert_eq!(result.len(), 3000);
    }

    #[test]
    fn incomplete_coverage_does_not_complete() {
        let mut table = ReassemblyTable::new();
        let frag = vec![9u8; 500];
        assert!(table
            .accept_fragment(key(), 1000, &frag, false, IpProtocol::UDP, 64, false)
            .is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn overlapping_fragment_overwrites() {
        let mut table = ReassemblyTable::new();
        let a = vec![1u8; 16];
        let b = vec![2u8; 16];
        table.accept_fragment(key(), 0, &a, true, IpProtocol::UDP, 64, false);
        let result = table
            .accept_fragment(key(), 8, &b, true, IpProtocol::UDP, 64, false)
            .unwrap();
        assert_eq!(&result[0..8], &[1u8; 8][..]);
        assert_eq!(&result[8..16], &[2u8; 8][..]);
    }
}
