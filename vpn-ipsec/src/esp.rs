//! The ESP data-plane transform: egress builds `SPI|Seq|IV|ciphertext|
//! ICV`, ingress verifies-then-decrypts. No anti-replay window is
//! enforced on ingress — any sequence number is accepted, a documented
//! limitation (spec.md §9, "anti-replay windows" Non-goal).

use std::convert::TryInto;

use vpn_crypto::des_cbc::{des_cbc_decrypt, des_cbc_encrypt, triple_des_cbc_decrypt, triple_des_cbc_encrypt};
use vpn_crypto::mac::{hmac_sha1_96, verify_hmac_sha1_96, HMAC_SHA1_96_LEN};
use vpn_crypto::rand::random_bytes;
use vpn_packets::{build_padded_plaintext, split_padded_plaintext, EspPacket};

use crate::error::{IpsecError, Result};
use crate::table::{CipherKind, IpsecSa};

/// Encrypts and authenticates `inner_ip_datagram` (the full IPv4 or
/// IPv6 packet being tunneled) under `sa`, returning the wire-ready
/// ESP payload (to hand to the IPv4/IPv6 stack with protocol = ESP).
///
/// `inner_protocol` is the IP protocol number of the tunneled datagram
/// (4 for IPv4-in-IP, 41 for IPv6-in-IP).
pub fn encapsulate(sa: &mut IpsecSa, inner_ip_datagram: &[u8], inner_protocol: u8) -> Result<Vec<u8>> {
    let block_size = sa.cipher.block_size();
    let padded = build_padded_plaintext(inner_ip_datagram, block_size, inner_protocol);

    let iv = if sa.sequence == 0 {
        let mut fresh = [0u8; 8];
        fresh.copy_from_slice(&random_bytes(8));
        fresh
    } else {
        sa.next_iv
    };

    let ciphertext = match sa.cipher {
        CipherKind::Des => des_cbc_encrypt(&sa.encryption_key, &iv, &padded)?,
        CipherKind::TripleDes => triple_des_cbc_encrypt(&sa.encryption_key, &iv, &padded)?,
    };

    sa.sequence = sa.sequence.wrapping_add(1);
    let unauthenticated = EspPacket::build(sa.spi, sa.sequence, &iv, &ciphertext, &[0u8; HMAC_SHA1_96_LEN]);
    let icv = hmac_sha1_96(&sa.hmac_key, unauthenticated.auth_covered());
    let packet = EspPacket::build(sa.spi, sa.sequence, &iv, &ciphertext, &icv);

    // Chained IV: the next message's IV is this message's last ciphertext block (RFC 2406-style CBC chaining across messages).
    let last_block_start = ciphertext.len() - block_size;
    sa.next_iv.copy_from_slice(&ciphertext[last_block_start..]);

    sa.bytes_transferred += packet.data.len() as u64;
    Ok(packet.into_data())
}

/// Verifies and decrypts an inbound ESP payload, returning the
/// recovered inner IP datagram and its protocol number.
pub fn decapsulate(sa: &IpsecSa, esp_wire_bytes: Vec<u8>) -> Result<(Vec<u8>, u8)> {
    let packet = EspPacket::new(esp_wire_bytes, 8, HMAC_SHA1_96_LEN).map_err(IpsecError::Malformed)?;

    if !verify_hmac_sha1_96(&sa.hmac_key, packet.auth_covered(), packet.icv()) {
        return Err(IpsecError::IntegrityCheckFailed);
    }

    let iv: [u8; 8] = packet.iv().try_into().map_err(|_| IpsecError::Malformed("ESP IV is not 8 bytes"))?;
    let plaintext = match sa.cipher {
        CipherKind::Des => des_cbc_decrypt(&sa.encryption_key, &iv, packet.ciphertext())?,
        CipherKind::TripleDes => triple_des_cbc_decrypt(&sa.encryption_key, &iv, packet.ciphertext())?,
    };
    let (payload, next_header) = split_padded_plaintext(&plaintext).map_err(IpsecError::Malformed)?;
    Ok((payload.to_vec(), next_header))
}
