//! The NIC adapter: wraps two host-provided NICs, filters ingress frames,
//! and suppresses loopback of our own recently-emitted frames.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use vpn_packets::MacAddr;

/// The host's per-NIC syscall surface (spec.md §6): info, send, and the
/// receive-callback registration. The engine never owns a socket
/// directly — it only ever calls through this trait.
pub trait HostNic {
    fn mac_address(&self) -> MacAddr;
    fn mtu(&self) -> u16;
    /// Sends a batch of already-built Ethernet frames.
    fn send(&mut self, frames: Vec<Vec<u8>>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicKind {
    Physical,
    Virtual,
}

const SENDER_MAC_EXPIRY: Duration = Duration::from_secs(60);

/// Wraps one host NIC: its receive queue (filled by the host's callback,
/// drained every handler invocation), its send queue, and the sender-MAC
/// list used to suppress loopback.
pub struct NicAdapter {
    pub kind: NicKind,
    pub mac: MacAddr,
    pub mtu: u16,
    pub promiscuous: bool,
    receive_queue: VecDeque<Vec<u8>>,
    send_queue: Vec<Vec<u8>>,
    sender_macs: HashMap<MacAddr, Instant>,
}

impl NicAdapter {
    pub fn new(kind: NicKind, mac: MacAddr, mtu: u16, promiscuous: bool) -> NicAdapter {
        NicAdapter {
            kind,
            mac,
            mtu,
            promiscuous,
            receive_queue: VecDeque::new(),
            send_queue: Vec::new(),
            sender_macs: HashMap::new(),
        }
    }

    /// Called from the host's receive callback, on whatever thread the
    /// host delivers frames on; the engine-wide mutex makes this safe.
    pub fn on_receive(&mut self, frame: Vec<u8>) {
        self.receive_queue.push_back(frame);
    }

    /// Drains the receive queue, dropping frames whose source MAC is in
    /// our sender-MAC list (loopback suppression, refreshing the entry's
    /// expiry on match) or whose destination MAC isn't broadcast,
    /// multicast, or ours (unless promiscuous).
    pub fn drain_filtered(&mut self) -> Vec<Vec<u8>> {
        let mut accepted = Vec::with_capacity(self.receive_queue.len());
        while let Some(frame) = self.receive_queue.pop_front() {
            if frame.len() < 14 {
                continue;
            }
            let src = match MacAddr::from_slice(&frame[6..12]) {
                Ok(mac) => mac,
                Err(_) => continue,
            };
            let dest = match MacAddr::from_slice(&frame[0..6]) {
                Ok(mac) => mac,
                Err(_) => continue,
            };

            if self.is_recently_sent(&src) {
                continue;
            }
            if !self.promiscuous && !dest.is_broadcast() && !dest.is_multicast() && dest != self.mac {
                continue;
            }
            accepted.push(frame);
        }
        accepted
    }

    fn is_recently_sent(&mut self, mac: &MacAddr) -> bool {
        if let Some(expiry) = self.sender_macs.get_mut(mac) {
            *expiry = Instant::now() + SENDER_MAC_EXPIRY;
            true
        } else {
            false
        }
    }

    /// Enqueues a frame for send; it is flushed on the next `flush`.
    /// Records the frame's source MAC in the sender-MAC list.
    pub fn enqueue(&mut self, frame: Vec<u8>) {
        if frame.len() >= 12 {
            if let Ok(src) = MacAddr::from_slice(&frame[6..12]) {
                self.sender_macs.insert(src, Instant::now() + SENDER_MAC_EXPIRY);
            }
        }
        self.send_queue.push(frame);
    }

    pub fn flush(&mut self, host: &mut dyn HostNic) {
        self.sender_macs.retain(|_, expiry| *expiry > Instant::now());
        if !self.send_queue.is_empty() {
            host.send(std::mem::take(&mut self.send_queue));
        }
    }

    pub fn has_pending_receive(&self) -> bool {
        !self.receive_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(src: [u8; 6], dest: [u8; 6]) -> Vec<u8> {
        let mut data = vec![0u8; 14];
        data[0..6].copy_from_slice(&dest);
        data[6..12].copy_from_slice(&src);
        data
    }

    #[test]
    fn recently_sent_source_is_dropped_on_ingress() {
        let mut nic = NicAdapter::new(NicKind::Physical, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, false);
        nic.enqueue(frame([9, 9, 9, 9, 9, 9], [1, 0, 0, 0, 0, 1]));
        nic.on_receive(frame([9, 9, 9, 9, 9, 9], [0xff, 0xff, 0xff, 0xff, 0xff, 0xff]));
        assert!(nic.drain_filtered().is_empty());
    }

    #[test]
    fn unicast_to_other_mac_is_dropped_when_not_promiscuous() {
        let mut nic = NicAdapter::new(NicKind::Physical, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, false);
        nic.on_receive(frame([2, 0, 0, 0, 0, 2], [3, 0, 0, 0, 0, 3]));
        assert!(nic.drain_filtered().is_empty());
    }

    #[test]
    fn broadcast_is_accepted() {
        let mut nic = NicAdapter::new(NicKind::Physical, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, false);
        nic.on_receive(frame([2, 0, 0, 0, 0, 2], [0xff, 0xff, 0xff, 0xff, 0xff, 0xff]));
        assert_eq!(nic.drain_filtered().len(), 1);
    }
}
