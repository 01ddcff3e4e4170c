pub mod payload;
pub mod wire;

use crate::error::{IkeError, Result};
use byteorder::{BigEndian, ByteOrder};
use payload::{decode_chain, encode_chain, Payload};
use wire::{ExchangeType, ISAKMP_HEADER_LEN};

const DES_BLOCK_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsakmpHeader {
    pub initiator_cookie: u64,
    pub responder_cookie: u64,
    pub next_payload: u8,
    pub exchange_type: ExchangeType,
    pub flags: u8,
    pub message_id: u32,
}

impl IsakmpHeader {
    pub fn is_encrypted(&self) -> bool {
        self.flags & wire::header_flag::ENCRYPTED != 0
    }

    fn encode(&self, next_payload: u8, message_size: u32) -> [u8; ISAKMP_HEADER_LEN] {
        let mut out = [0u8; ISAKMP_HEADER_LEN];
        BigEndian::write_u64(&mut out[0..8], self.initiator_cookie);
        BigEndian::write_u64(&mut out[8..16], self.responder_cookie);
        out[16] = next_payload;
        out[17] = wire::IKE_VERSION;
        out[18] = self.exchange_type as u8;
        out[19] = self.flags;
        BigEndian::write_u32(&mut out[20..24], self.message_id);
        BigEndian::write_u32(&mut out[24..28], message_size);
        out
    }

    fn decode(data: &[u8]) -> Result<IsakmpHeader> {
        if data.len() < ISAKMP_HEADER_LEN {
            return Err(IkeError::MalformedPayload("ISAKMP header truncated"));
        }
        let exchange_type = ExchangeType::from_u8(data[18])
            .ok_or(IkeError::UnsupportedExchange(data[18]))?;
        Ok(IsakmpHeader {
            initiator_cookie: BigEndian::read_u64(&data[0..8]),
            responder_cookie: BigEndian::read_u64(&data[8..16]),
            next_payload: data[16],
            exchange_type,
            flags: data[19],
            message_id: BigEndian::read_u32(&data[20..24]),
        })
    }
}

/// A fully decoded ISAKMP message: header plus payload chain, already
/// decrypted if the header's `encrypted` flag was set.
#[derive(Debug, Clone)]
pub struct IkeMessage {
    pub header: IsakmpHeader,
    pub payloads: Vec<Payload>,
}

/// Reads the `MessageId` field straight out of the (always cleartext)
/// ISAKMP header, so a receiver can derive the Phase-2 IV before
/// attempting to decrypt the payload chain.
pub fn message_id_of(data: &[u8]) -> Result<u32> {
    if data.len() < ISAKMP_HEADER_LEN {
        return Err(IkeError::MalformedPayload("ISAKMP header truncated"));
    }
    Ok(BigEndian::read_u32(&data[20..24]))
}

impl IkeMessage {
    pub fn new(header: IsakmpHeader, payloads: Vec<Payload>) -> IkeMessage {
        IkeMessage { header, payloads }
    }

    /// Serializes the message in cleartext. Use [`encode_encrypted`] for
    /// messages sent after Phase-1 keys are established.
    pub fn encode(&self) -> Vec<u8> {
        let body = encode_chain(&self.payloads);
        let next_payload = self
            .payloads
            .first()
            .map(|p| payload_type_of(p))
            .unwrap_or(wire::PayloadType::None as u8);
        let mut out = Vec::with_capacity(ISAKMP_HEADER_LEN + body.len());
        out.extend_from_slice(&self.header.encode(next_payload, (ISAKMP_HEADER_LEN + body.len()) as u32));
        out.extend_from_slice(&body);
        out
    }

    /// Encrypts the payload chain under the Phase-1 `SKEYID_e`-derived
    /// cipher key, using `iv` as the DES-CBC IV and padding per
    /// `pad_for_encryption`. Sets the header's `encrypted` flag.
    pub fn encode_encrypted(&self, key: &[u8], iv: &[u8; 8]) -> Result<Vec<u8>> {
        let body = encode_chain(&self.payloads);
        let next_payload = self
            .payloads
            .first()
            .map(|p| payload_type_of(p))
            .unwrap_or(wire::PayloadType::None as u8);
        let padded = pad_for_encryption(&body);
        let ciphertext = vpn_crypto::des_cbc::des_cbc_encrypt(key, iv, &padded)?;
        let mut header = self.header;
        header.flags |= wire::header_flag::ENCRYPTED;
        let mut out = Vec::with_capacity(ISAKMP_HEADER_LEN + ciphertext.len());
        out.extend_from_slice(&header.encode(next_payload, (ISAKMP_HEADER_LEN + ciphertext.len()) as u32));
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Parses a wire message, decrypting the payload chain with `key`/
    /// `iv` if the header's `encrypted` flag is set. Pass a dummy key/iv
    /// for cleartext messages (unused in that path).
    pub fn decode(data: &[u8], key: &[u8], iv: &[u8; 8]) -> Result<IkeMessage> {
        let header = IsakmpHeader::decode(data)?;
        let body = &data[ISAKMP_HEADER_LEN..];
        let payloads = if header.is_encrypted() {
            if body.len() % DES_BLOCK_LEN != 0 {
                return Err(IkeError::MalformedPayload("encrypted body not block-aligned"));
            }
            let plaintext = vpn_crypto::des_cbc::des_cbc_decrypt(key, iv, body)?;
            let unpadded = strip_padding(&plaintext)?;
            decode_chain(header.next_payload, unpadded)?
        } else {
            decode_chain(header.next_payload, body)?
        };
        Ok(IkeMessage { header, payloads })
    }
}

fn payload_type_of(payload: &Payload) -> u8 {
    use wire::PayloadType::*;
    (match payload {
        Payload::Sa(_) => Sa,
        Payload::KeyExchange(_) => KeyExchange,
        Payload::Id(_) => Id,
        Payload::Cert(_) => Cert,
        Payload::CertRequest(_) => CertRequest,
        Payload::Hash(_) => Hash,
        Payload::Signature(_) => Signature,
        Payload::Nonce(_) => Nonce,
        Payload::Notify(_) => Notify,
        Payload::Delete(_) => Delete,
        Payload::VendorId(_) => VendorId,
    }) as u8
}

/// RFC 2406-style counting padding isn't used here; the ISAKMP
/// encryption framing pads with zero bytes and a trailing length byte
/// in `0..=7`, the scheme the reference implementation's `SeIke.c`
/// uses for its DES-CBC payload encryption.
fn pad_for_encryption(plaintext: &[u8]) -> Vec<u8> {
    let pad_len = (DES_BLOCK_LEN - (plaintext.len() + 1) % DES_BLOCK_LEN) % DES_BLOCK_LEN;
    let mut out = Vec::with_capacity(plaintext.len() + pad_len + 1);
    out.extend_from_slice(plaintext);
    out.extend(std::iter::repeat(0u8).take(pad_len));
    out.push(pad_len as u8);
    out
}

fn strip_padding(plaintext: &[u8]) -> Result<&[u8]> {
    let pad_len = *plaintext
        .last()
        .ok_or(IkeError::MalformedPayload("encrypted body empty"))? as usize;
    if pad_len > 7 || pad_len + 1 > plaintext.len() {
        return Err(IkeError::MalformedPayload("padding length out of range"));
    }
    Ok(&plaintext[..plaintext.len() - pad_len - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::Payload;

    #[test]
    fn cleartext_roundtrip() {
        let header = IsakmpHeader {
            initiator_cookie: 0x1111_1111_1111_1111,
            responder_cookie: 0,
            next_payload: 0,
            exchange_type: ExchangeType::Main,
            flags: 0,
            message_id: 0,
        };
        let message = IkeMessage::new(header, vec![Payload::Nonce(vec![9, 8, 7])]);
        let bytes = message.encode();
        let decoded = IkeMessage::decode(&bytes, &[0u8; 8], &[0u8; 8]).unwrap();
        assert_eq!(decoded.header.initiator_cookie, header.initiator_cookie);
        assert_eq!(decoded.payloads, vec![Payload::Nonce(vec![9, 8, 7])]);
    }

    #[test]
    fn encrypted_roundtrip() {
        let header = IsakmpHeader {
            initiator_cookie: 0x2222_2222_2222_2222,
            responder_cookie: 0x3333_3333_3333_3333,
            next_payload: 0,
            exchange_type: ExchangeType::Quick,
            flags: 0,
            message_id: 42,
        };
        let message = IkeMessage::new(header, vec![Payload::Hash(vec![1; 20])]);
        let key = [0x55u8; 8];
        let iv = [0xAAu8; 8];
        let bytes = message.encode_encrypted(&key, &iv).unwrap();
        let decoded = IkeMessage::decode(&bytes, &key, &iv).unwrap();
        assert!(decoded.header.is_encrypted());
        assert_eq!(decoded.payloads, vec![Payload::Hash(vec![1; 20])]);
    }

    #[test]
    fn padding_strip_rejects_oversized_length() {
        assert!(strip_padding(&[1, 2, 3, 9]).is_err());
    }
}
