//! Host-facing configuration, per-link IP stacks, and the IKE/IPsec
//! engine that composes them. Downstream crates implement the wire
//! formats and cryptography (`vpn-packets`, `vpn-crypto`, `vpn-ike`,
//! `vpn-ipsec`); this crate is where they're wired into something a
//! host can actually run.

pub mod config;
pub mod error;
pub mod timer;

pub mod nic;

pub mod arp_cache;
pub mod ndp_cache;
pub mod reassembly;
pub mod parser;
pub mod dhcp_server;

pub mod ipv4_stack;
pub mod ipv6_stack;
pub mod router;

pub mod engine;

pub use config::{RouterMode, V4Config, V6Config, VpnConfig};
pub use engine::{CredentialProvider, Engine, PasswordCredentials};
pub use error::{EngineError, Result};
pub use nic::{HostNic, NicAdapter};
