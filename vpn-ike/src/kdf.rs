//! RFC 2409 key derivation: `SKEYID` and its three children, Phase-1/2
//! IV derivation, the `HASH_I`/`HASH_R`/`HASH(1..3)` authenticators, and
//! per-direction Quick Mode `KEYMAT`. Every function here is a pure
//! function of its inputs, which is what invariant 3 in the testable
//! properties list relies on.

use vpn_crypto::hash::sha1;
use vpn_crypto::keymat as prf_expand;
use vpn_crypto::mac::hmac_sha1;

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

/// `SKEYID = prf(psk, Ni | Nr)`, prf = HMAC-SHA-1.
pub fn skeyid_psk(psk: &[u8], ni: &[u8], nr: &[u8]) -> [u8; 20] {
    hmac_sha1(psk, &concat(&[ni, nr]))
}

/// `SKEYID = prf(Ni | Nr, g^xy)`.
pub fn skeyid_rsa_sig(ni: &[u8], nr: &[u8], shared_secret: &[u8]) -> [u8; 20] {
    let key = concat(&[ni, nr]);
    hmac_sha1(&key, shared_secret)
}

/// `SKEYID_d = prf(SKEYID, g^xy | CKY-I | CKY-R | 0)`.
pub fn skeyid_d(skeyid: &[u8], shared_secret: &[u8], cky_i: u64, cky_r: u64) -> [u8; 20] {
    hmac_sha1(skeyid, &concat(&[shared_secret, &cky_i.to_be_bytes(), &cky_r.to_be_bytes(), &[0]]))
}

/// `SKEYID_a = prf(SKEYID, SKEYID_d | g^xy | CKY-I | CKY-R | 1)`.
pub fn skeyid_a(skeyid: &[u8], skeyid_d: &[u8], shared_secret: &[u8], cky_i: u64, cky_r: u64) -> [u8; 20] {
    hmac_sha1(
        skeyid,
        &concat(&[skeyid_d, shared_secret, &cky_i.to_be_bytes(), &cky_r.to_be_bytes(), &[1]]),
    )
}

/// `SKEYID_e = prf(SKEYID, SKEYID_a | g^xy | CKY-I | CKY-R | 2)`.
pub fn skeyid_e(skeyid: &[u8], skeyid_a: &[u8], shared_secret: &[u8], cky_i: u64, cky_r: u64) -> [u8; 20] {
    hmac_sha1(
        skeyid,
        &concat(&[skeyid_a, shared_secret, &cky_i.to_be_bytes(), &cky_r.to_be_bytes(), &[2]]),
    )
}

/// Stretches `SKEYID_e` to `needed_len` bytes for ciphers (3DES) whose
/// key is longer than one HMAC-SHA-1 block, via `Ka_{n+1} =
/// prf(SKEYID_e, Ka_n)` starting from an empty `Ka_0`.
pub fn expand_cipher_key(skeyid_e: &[u8], needed_len: usize) -> Vec<u8> {
    prf_expand::expand(skeyid_e, &[], needed_len)
}

/// Phase-1 IV: `SHA-1(g^x | g^y)` truncated to the cipher block size.
pub fn phase1_iv(g_x: &[u8], g_y: &[u8], block_size: usize) -> Vec<u8> {
    let digest = sha1(&concat(&[g_x, g_y]));
    digest[..block_size].to_vec()
}

/// Phase-2 IV: `SHA-1(last_Phase1_IV | MessageID)` truncated likewise.
pub fn phase2_iv(last_iv: &[u8], message_id: u32, block_size: usize) -> Vec<u8> {
    let digest = sha1(&concat(&[last_iv, &message_id.to_be_bytes()]));
    digest[..block_size].to_vec()
}

/// `HASH_I = prf(SKEYID, g^x | g^y | CKY-I | CKY-R | SAi_b | IDii_b)`.
pub fn hash_i(skeyid: &[u8], g_x: &[u8], g_y: &[u8], cky_i: u64, cky_r: u64, sa_i_b: &[u8], id_ii_b: &[u8]) -> [u8; 20] {
    hmac_sha1(
        skeyid,
        &concat(&[g_x, g_y, &cky_i.to_be_bytes(), &cky_r.to_be_bytes(), sa_i_b, id_ii_b]),
    )
}

/// `HASH_R`, the symmetric responder counterpart: `prf(SKEYID, g^y |
/// g^x | CKY-R | CKY-I | SAi_b | IDir_b)`.
pub fn hash_r(skeyid: &[u8], g_x: &[u8], g_y: &[u8], cky_i: u64, cky_r: u64, sa_i_b: &[u8], id_ir_b: &[u8]) -> [u8; 20] {
    hmac_sha1(
        skeyid,
        &concat(&[g_y, g_x, &cky_r.to_be_bytes(), &cky_i.to_be_bytes(), sa_i_b, id_ir_b]),
    )
}

/// `HASH(1) = prf(SKEYID_a, M-ID | SA | Ni' | [KE'] | [IDci | IDcr])`.
pub fn hash1(skeyid_a: &[u8], message_id: u32, sa: &[u8], ni: &[u8], ke: &[u8], id_ci_cr: &[u8]) -> [u8; 20] {
    hmac_sha1(skeyid_a, &concat(&[&message_id.to_be_bytes(), sa, ni, ke, id_ci_cr]))
}

/// `HASH(2) = prf(SKEYID_a, M-ID | Ni' | SA | Nr' | [KE'] | [IDci |
/// IDcr])`.
pub fn hash2(skeyid_a: &[u8], message_id: u32, sa: &[u8], ni: &[u8], nr: &[u8], ke: &[u8], id_ci_cr: &[u8]) -> [u8; 20] {
    hmac_sha1(skeyid_a, &concat(&[&message_id.to_be_bytes(), ni, sa, nr, ke, id_ci_cr]))
}

/// `HASH(3) = prf(SKEYID_a, 0 | M-ID | Ni' | Nr')`.
pub fn hash3(skeyid_a: &[u8], message_id: u32, ni: &[u8], nr: &[u8]) -> [u8; 20] {
    hmac_sha1(skeyid_a, &concat(&[&[0u8], &message_id.to_be_bytes(), ni, nr]))
}

/// Per-direction Quick Mode KEYMAT: `prf(SKEYID_d, protocol | SPI | Ni'
/// | Nr')`, iterated by prepending the previous block, same expansion
/// shape as [`expand_cipher_key`] but keyed on `SKEYID_d` with a
/// non-empty seed.
pub fn keymat(skeyid_d: &[u8], protocol_id: u8, spi: &[u8], ni: &[u8], nr: &[u8], needed_len: usize) -> Vec<u8> {
    let seed = concat(&[&[protocol_id], spi, ni, nr]);
    prf_expand::expand(skeyid_d, &seed, needed_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeyid_psk_is_deterministic() {
        let psk = b"secret";
        let ni = [1u8; 20];
        let nr = [2u8; 20];
        assert_eq!(skeyid_psk(psk, &ni, &nr), skeyid_psk(psk, &ni, &nr));
    }

    #[test]
    fn derived_keys_depend_on_cookies() {
        let skeyid = [9u8; 20];
        let shared = [8u8; 128];
        let d1 = skeyid_d(&skeyid, &shared, 1, 2);
        let d2 = skeyid_d(&skeyid, &shared, 1, 3);
        assert_ne!(d1, d2);
    }

    #[test]
    fn expand_cipher_key_produces_requested_length() {
        let e = [3u8; 20];
        assert_eq!(expand_cipher_key(&e, 24).len(), 24);
    }

    #[test]
    fn keymat_differs_by_protocol_and_spi() {
        let d = [4u8; 20];
        let ni = [5u8; 20];
        let nr = [6u8; 20];
        let esp = keymat(&d, 3, &[1, 2, 3, 4], &ni, &nr, 40);
        let ah = keymat(&d, 2, &[1, 2, 3, 4], &ni, &nr, 40);
        assert_ne!(esp, ah);
    }
}
