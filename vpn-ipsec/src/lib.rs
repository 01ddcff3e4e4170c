//! IPsec SA table and the ESP tunnel-mode data-plane transform.
//! Consumes key material (`IpsecSa::encryption_key`/`hmac_key`) that
//! `vpn-ike`'s Quick Mode produces; knows nothing about IKE itself.

pub mod error;
pub mod esp;
pub mod table;

pub use error::{IpsecError, Result};
pub use table::{CipherKind, Direction, IpsecSa, SaTable};
