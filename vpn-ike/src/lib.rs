//! IKEv1 (RFC 2409) payload codec and the Phase-1/Phase-2 key-exchange
//! state machines that ride on it. This crate knows nothing about NICs,
//! timers, or ESP data-plane encapsulation; it consumes/produces ISAKMP
//! messages and hands the host engine a `IkeSa` whose `SKEYID_*` and
//! `KEYMAT` fields are ready for `vpn-ipsec` to install.

pub mod codec;
pub mod error;
pub mod informational;
pub mod kdf;
pub mod phase1;
pub mod phase2;
pub mod sa;

pub use codec::payload::*;
pub use codec::wire;
pub use error::{IkeError, Result};
pub use sa::{AuthMethod, IkeSa, Phase1Role, Phase1State, Phase2State};
