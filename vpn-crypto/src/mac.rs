use hmac::{Hmac, Mac};
use sha1::Sha1;

pub const HMAC_SHA1_LEN: usize = 20;
pub const HMAC_SHA1_96_LEN: usize = 12;

type HmacSha1 = Hmac<Sha1>;

/// Full 20-byte HMAC-SHA-1 (RFC 2104). This is IKEv1's PRF for both PSK
/// and RSA-signature authentication (RFC 2409 section 5).
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; HMAC_SHA1_LEN] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; HMAC_SHA1_LEN];
    out.copy_from_slice(&result);
    out
}

/// HMAC-SHA-1-96 (RFC 2404): the truncated form used as ESP's default
/// integrity check.
pub fn hmac_sha1_96(key: &[u8], data: &[u8]) -> [u8; HMAC_SHA1_96_LEN] {
    let full = hmac_sha1(key, data);
    let mut out = [0u8; HMAC_SHA1_96_LEN];
    out.copy_from_slice(&full[..HMAC_SHA1_96_LEN]);
    out
}

pub fn verify_hmac_sha1_96(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    if tag.len() != HMAC_SHA1_96_LEN {
        return false;
    }
    let expected = hmac_sha1_96(key, data);
    constant_time_eq(&expected, tag)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha1_known_answer() {
        // RFC 2202 test case 1.
        let key = [0x0bu8; 20];
        let data = b"Hi There";
        let mac = hmac_sha1(&key, data);
        assert_eq!(
            hex::encode(mac),
            "b617318655057264e28bc0b6fb378c8ef146be00"
        );
    }

    #[test]
    fn truncated_96_verifies() {
        let key = [1u8; 20];
        let data = b"esp payload";
        let tag = hmac_sha1_96(&key, data);
        assert!(verify_hmac_sha1_96(&key, data, &tag));
        let mut corrupted = tag;
        corrupted[0] ^= 0xFF;
        assert!(!verify_hmac_sha1_96(&key, data, &corrupted));
    }
}
