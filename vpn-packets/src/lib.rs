//! Wire formats used by the VPN engine: Ethernet, ARP, IPv4/IPv6, ICMP/
//! ICMPv6, UDP, TCP, DHCP, and ESP. Every type here owns its backing
//! buffer and exposes getters/setters over byte ranges of it; building a
//! packet is mutating an owned `Vec<u8>` in place, not assembling a tree
//! of structs. This mirrors how the layers nest on the wire and keeps
//! encode/decode symmetric.

mod types;
pub use self::types::*;

mod ethernet;
pub use self::ethernet::*;

mod arp;
pub use self::arp::*;

mod ipv4;
pub use self::ipv4::*;

mod ipv6;
pub use self::ipv6::*;

mod icmp;
pub use self::icmp::*;

mod icmpv6;
pub use self::icmpv6::*;

mod udp;
pub use self::udp::*;

mod tcp;
pub use self::tcp::*;

mod dhcp;
pub use self::dhcp::*;

mod esp;
pub use self::esp::*;
