use std::convert::TryInto;

/// ESP (RFC 2406) header, as carried directly in an IP payload (protocol
/// 50) in tunnel mode: SPI | Sequence | IV | ciphertext+padding | ICV.
/// IV length and ICV length are algorithm-dependent and supplied by the
/// caller, since this wrapper doesn't know which transform negotiated the
/// SA.
#[derive(Clone, Debug)]
pub struct EspPacket {
    pub data: Vec<u8>,
    pub iv_len: usize,
    pub icv_len: usize,
}

impl EspPacket {
    pub fn new(data: Vec<u8>, iv_len: usize, icv_len: usize) -> Result<EspPacket, &'static str> {
        if data.len() < 8 + iv_len + icv_len {
            return Err("Packet too short to be an ESP datagram with the given IV/ICV lengths");
        }
        Ok(EspPacket {
            data,
            iv_len,
            icv_len,
        })
    }

    pub fn build(spi: u32, sequence: u32, iv: &[u8], ciphertext: &[u8], icv: &[u8]) -> EspPacket {
        let mut data = Vec::with_capacity(8 + iv.len() + ciphertext.len() + icv.len());
        data.extend_from_slice(&spi.to_be_bytes());
        data.extend_from_slice(&sequence.to_be_bytes());
        data.extend_from_slice(iv);
        data.extend_from_slice(ciphertext);
        data.extend_from_slice(icv);
        EspPacket {
            data,
            iv_len: iv.len(),
            icv_len: icv.len(),
        }
    }

    pub fn spi(&self) -> u32 {
        u32::from_be_bytes(self.data[0..4].try_into().unwrap())
    }

    pub fn sequence(&self) -> u32 {
        u32::from_be_bytes(self.data[4..8].try_into().unwrap())
    }

    pub fn iv(&self) -> &[u8] {
        &self.data[8..8 + self.iv_len]
    }

    /// Ciphertext (padding + pad-length + next-header included, still
    /// encrypted) between the IV and the ICV.
    pub fn ciphertext(&self) -> &[u8] {
        let start = 8 + self.iv_len;
        let end = self.data.len() - self.icv_len;
        &self.data[start..end]
    }

    pub fn icv(&self) -> &[u8] {
        let start = self.data.len() - self.icv_len;
        &self.data[start..]
    }

    /// Bytes covered by the ICV/MAC: everything except the ICV itself.
    pub fn auth_covered(&self) -> &[u8] {
        let end = self.data.len() - self.icv_len;
        &self.data[..end]
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Trailer appended before encryption: padding, pad length, next header.
/// Padding brings the plaintext to a multiple of the cipher's block size;
/// bytes are a 1..=255 counting sequence per RFC 2406 section 2.4.
pub fn build_padded_plaintext(payload: &[u8], block_size: usize, next_header: u8) -> Vec<u8> {
    let mut plaintext = payload.to_vec();
    let unpadded_len = plaintext.len() + 2; // + pad length + next header
    let remainder = unpadded_len % block_size;
    let pad_len = if remainder == 0 { 0 } else { block_size - remainder };
    for i in 1..=pad_len {
        plaintext.push(i as u8);
    }
    plaintext.push(pad_len as u8);
    plaintext.push(next_header);
    plaintext
}

/// Strips and validates the ESP trailer from decrypted plaintext,
/// returning `(payload, next_header)`.
pub fn split_padded_plaintext(plaintext: &[u8]) -> Result<(&[u8], u8), &'static str> {
    if plaintext.len() < 2 {
        return Err("Decrypted ESP plaintext too short to contain a trailer");
    }
    let next_header = plaintext[plaintext.len() - 1];
    let pad_len = plaintext[plaintext.len() - 2] as usize;
    if plaintext.len() < 2 + pad_len {
        return Err("ESP pad length field exceeds plaintext length");
    }
    let payload_end = plaintext.len() - 2 - pad_len;
    let padding = &plaintext[payload_end..plaintext.len() - 2];
    for (i, &byte) in padding.iter().enumerate() {
        if byte as usize != i + 1 {
            return Err("ESP padding bytes are not the expected counting sequence");
        }
    }
    Ok((&plaintext[..payload_end], next_header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse() {
        let iv = [0xAAu8; 8];
        let ciphertext = vec![1u8; 24];
        let icv = [0xBBu8; 12];
        let packet = EspPacket::build(0x1234, 7, &iv, &ciphertext, &icv);
        let parsed = EspPacket::new(packet.into_data(), 8, 12).unwrap();
        assert_eq!(parsed.spi(), 0x1234);
        assert_eq!(parsed.sequence(), 7);
        assert_eq!(parsed.iv(), &iv[..]);
        assert_eq!(parsed.ciphertext(), &ciphertext[..]);
        assert_eq!(parsed.icv(), &icv[..]);
    }

    #[test]
    fn padding_roundtrip() {
        let payload = vec![1, 2, 3, 4, 5];
        let plaintext = build_padded_plaintext(&payload, 8, 17);
        assert_eq!(plaintext.len() % 8, 0);
        let (recovered, next_header) = split_padded_plaintext(&plaintext).unwrap();
        assert_eq!(recovered, &payload[..]);
        assert_eq!(next_header, 17);
    }

    #[test]
    fn rejects_corrupted_padding() {
        let payload = vec![1, 2, 3];
        let mut plaintext = build_padded_plaintext(&payload, 8, 17);
        let corrupt_idx = plaintext.len() - 3;
        plaintext[corrupt_idx] = 0xFF;
        assert!(split_padded_plaintext(&plaintext).is_err());
    }
}
