use crate::mac::hmac_sha1;

/// Iterated HMAC-SHA-1 keying material expansion, RFC 2409 Appendix B:
///
///   K1 = prf(key, seed)
///   K2 = prf(key, K1 | seed)
///   K3 = prf(key, K2 | seed)
///   ...
///
/// used both for Quick Mode KEYMAT and, with an empty seed, as a general
/// "stretch this PRF output to N bytes" primitive.
pub fn expand(key: &[u8], seed: &[u8], output_len: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(output_len + 20);
    let mut block = Vec::new();
    while output.len() < output_len {
        let mut input = block.clone();
        input.extend_from_slice(seed);
        block = hmac_sha1(key, &input).to_vec();
        output.extend_from_slice(&block);
    }
    output.truncate(output_len);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_is_deterministic_and_sized() {
        let key = [0x01u8; 20];
        let seed = b"SPI||Ni_b||Nr_b";
        let first = expand(&key, seed, 48);
        let second = expand(&key, seed, 48);
        assert_eq!(first, second);
        assert_eq!(first.len(), 48);
    }

    #[test]
    fn expand_prefix_is_stable_as_length_grows() {
        let key = [0x02u8; 20];
        let seed = b"seed";
        let short = expand(&key, seed, 20);
        let long = expand(&key, seed, 40);
        assert_eq!(&long[..20], &short[..]);
    }
}
