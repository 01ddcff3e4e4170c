use rand::RngCore;

/// A cryptographically random nonce or SPI, of the given length. IKEv1
/// nonces (Ni/Nr) are sized 8-256 bytes per RFC 2409; this engine always
/// generates 20-byte ones to match its SHA-1-keyed PRF.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn random_u32() -> u32 {
    rand::thread_rng().next_u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_has_requested_length() {
        assert_eq!(random_bytes(20).len(), 20);
    }

    #[test]
    fn random_u32_is_not_trivially_zero_every_time() {
        let samples: Vec<u32> = (0..8).map(|_| random_u32()).collect();
        assert!(samples.iter().any(|&v| v != 0));
    }
}
