//! Crypto primitives used by the IKEv1 handshake and ESP encapsulation.
//! Every algorithm here is a negotiated requirement of those two
//! protocols, not a general-purpose toolbox: DES/3DES-CBC for
//! confidentiality, SHA-1/MD5 and their HMAC constructions for the PRF
//! and authentication, Diffie-Hellman group 2 for key exchange, and
//! RSA-PKCS1-v1.5 signature verification for certificate-based auth.

pub mod des_cbc;
pub use self::des_cbc::*;

pub mod hash;
pub use self::hash::*;

pub mod mac;
pub use self::mac::*;

pub mod dh;
pub use self::dh::*;

pub mod rsa_sig;
pub use self::rsa_sig::*;

pub mod keymat;
pub use self::keymat::*;

pub mod rand;
pub use self::rand::*;

pub mod error;
pub use self::error::*;
