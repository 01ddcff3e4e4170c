use crate::error::{CryptoError, Result};
use num_bigint::BigUint;
use rand::RngCore;

/// RFC 2409 Second Oakley Group: a 1024-bit MODP group. This is the only
/// Diffie-Hellman group this engine offers or accepts.
pub const GROUP2_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
    "FFFFFFFFFFFFFFFF",
);

pub const GROUP2_PRIVATE_KEY_BYTES: usize = 32;

pub struct DiffieHellman {
    prime: BigUint,
    generator: BigUint,
    private_key: BigUint,
    pub public_key: BigUint,
}

impl DiffieHellman {
    /// Generates a fresh keypair with a `GROUP2_PRIVATE_KEY_BYTES`-byte
    /// random private exponent, matching the size BitVisor's own
    /// implementation picks for group 2.
    pub fn generate() -> DiffieHellman {
        let prime = group2_prime();
        let generator = BigUint::from(2u32);
        let mut rng = rand::thread_rng();
        let mut priv_bytes = [0u8; GROUP2_PRIVATE_KEY_BYTES];
        rng.fill_bytes(&mut priv_bytes);
        let private_key = BigUint::from_bytes_be(&priv_bytes);
        let public_key = generator.modpow(&private_key, &prime);
        DiffieHellman {
            prime,
            generator,
            private_key,
            public_key,
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        pad_to_key_size(&self.public_key.to_bytes_be(), key_byte_len())
    }

    /// Computes `peer_public^private_key mod p`, the shared secret g^xy.
    /// Rejects degenerate peer values (0, 1, p-1) that would make the
    /// shared secret trivially predictable.
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>> {
        let peer = BigUint::from_bytes_be(peer_public_key);
        if peer <= BigUint::from(1u32) || peer >= &self.prime - BigUint::from(1u32) {
            return Err(CryptoError::InvalidDhPublicValue);
        }
        let shared = peer.modpow(&self.private_key, &self.prime);
        Ok(pad_to_key_size(&shared.to_bytes_be(), key_byte_len()))
    }
}

fn key_byte_len() -> usize {
    128 // 1024 bits
}

fn pad_to_key_size(value: &[u8], size: usize) -> Vec<u8> {
    if value.len() >= size {
        return value[value.len() - size..].to_vec();
    }
    let mut padded = vec![0u8; size - value.len()];
    padded.extend_from_slice(value);
    padded
}

fn group2_prime() -> BigUint {
    BigUint::parse_bytes(GROUP2_PRIME_HEX.as_bytes(), 16).expect("static group 2 prime is valid hex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_agrees_between_peers() {
        let alice = DiffieHellman::generate();
        let bob = DiffieHellman::generate();

        let alice_shared = alice.shared_secret(&bob.public_key_bytes()).unwrap();
        let bob_shared = bob.shared_secret(&alice.public_key_bytes()).unwrap();

        assert_eq!(alice_shared, bob_shared);
        assert_eq!(alice_shared.len(), 128);
    }

    #[test]
    fn rejects_degenerate_peer_public_value() {
        let alice = DiffieHellman::generate();
        assert!(alice.shared_secret(&[0u8; 128]).is_err());
        assert!(alice.shared_secret(&[1u8]).is_err());
    }
}
