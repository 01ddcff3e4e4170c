//! ISAKMP payload types and their wire encoding. Payloads are decoded
//! into a tagged-sum `Payload` enum holding owned sub-lists (proposals,
//! transforms, attributes, SPIs) rather than keeping the wire's
//! `next_payload` chain alive in memory — the chain only exists while
//! walking bytes off the network.

use super::wire::{self, phase1_attr, phase2_attr, ATTR_AF_TV, GENERIC_PAYLOAD_HEADER_LEN};
use crate::error::{IkeError, Result};
use byteorder::{BigEndian, ByteOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u16,
    pub value: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    pub number: u8,
    pub transform_id: u8,
    pub attributes: Vec<Attribute>,
}

impl Transform {
    pub fn attr(&self, attr_type: u16) -> Option<u16> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == attr_type)
            .map(|a| a.value)
    }

    /// Builds a Phase-1 transform proposing DES-CBC or 3DES-CBC, SHA-1,
    /// PSK or RSA-SIG, 1024-bit MODP group 2, and a lifetime in seconds.
    pub fn phase1(number: u8, crypto: u16, auth_method: u16, life_seconds: u16) -> Transform {
        Transform {
            number,
            transform_id: wire::Phase1TransformId::Ike as u8,
            attributes: vec![
                Attribute { attr_type: phase1_attr::CRYPTO, value: crypto },
                Attribute { attr_type: phase1_attr::HASH, value: phase1_attr::HASH_SHA1 },
                Attribute { attr_type: phase1_attr::AUTH_METHOD, value: auth_method },
                Attribute { attr_type: phase1_attr::DH_GROUP, value: phase1_attr::DH_GROUP_1024_MODP },
                Attribute { attr_type: phase1_attr::LIFE_TYPE, value: phase1_attr::LIFE_TYPE_SECONDS },
                Attribute { attr_type: phase1_attr::LIFE_VALUE, value: life_seconds },
            ],
        }
    }

    /// Builds a Phase-2 (Quick Mode) transform proposing tunnel-mode
    /// ESP with the given cipher, HMAC-SHA1, and a lifetime in seconds.
    pub fn phase2(number: u8, transform_id: u8, life_seconds: u16) -> Transform {
        Transform {
            number,
            transform_id,
            attributes: vec![
                Attribute { attr_type: phase2_attr::HMAC, value: phase2_attr::HMAC_SHA1 },
                Attribute { attr_type: phase2_attr::CAPSULE, value: phase2_attr::CAPSULE_TUNNEL },
                Attribute { attr_type: phase2_attr::LIFE_TYPE, value: phase2_attr::LIFE_TYPE_SECONDS },
                Attribute { attr_type: phase2_attr::LIFE, value: life_seconds },
            ],
        }
    }

    fn encode(&self, is_last: bool) -> Vec<u8> {
        let mut attrs = Vec::with_capacity(self.attributes.len() * 4);
        for a in &self.attributes {
            let mut buf = [0u8; 4];
            BigEndian::write_u16(&mut buf[0..2], a.attr_type | ATTR_AF_TV);
            BigEndian::write_u16(&mut buf[2..4], a.value);
            attrs.extend_from_slice(&buf);
        }
        let total_len = GENERIC_PAYLOAD_HEADER_LEN + 4 + attrs.len();
        let mut out = Vec::with_capacity(total_len);
        out.push(if is_last { 0 } else { wire::PayloadType::Transform as u8 });
        out.push(0);
        let mut len_buf = [0u8; 2];
        BigEndian::write_u16(&mut len_buf, total_len as u16);
        out.extend_from_slice(&len_buf);
        out.push(self.number);
        out.push(self.transform_id);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&attrs);
        out
    }

    fn decode(body: &[u8]) -> Result<Transform> {
        if body.len() < 4 {
            return Err(IkeError::MalformedPayload("transform body too short"));
        }
        let number = body[0];
        let transform_id = body[1];
        let mut attributes = Vec::new();
        let mut offset = 4;
        while offset + 4 <= body.len() {
            let raw_type = BigEndian::read_u16(&body[offset..offset + 2]);
            let value = BigEndian::read_u16(&body[offset + 2..offset + 4]);
            attributes.push(Attribute {
                attr_type: raw_type & !ATTR_AF_TV,
                value,
            });
            offset += 4;
        }
        Ok(Transform { number, transform_id, attributes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub number: u8,
    pub protocol_id: u8,
    pub spi: Vec<u8>,
    pub transforms: Vec<Transform>,
}

impl Proposal {
    fn encode(&self, is_last: bool) -> Vec<u8> {
        let transform_bytes: Vec<u8> = self
            .transforms
            .iter()
            .enumerate()
            .flat_map(|(i, t)| t.encode(i + 1 == self.transforms.len()))
            .collect();
        let total_len = GENERIC_PAYLOAD_HEADER_LEN + 4 + self.spi.len() + transform_bytes.len();
        let mut out = Vec::with_capacity(total_len);
        out.push(if is_last { 0 } else { wire::PayloadType::Proposal as u8 });
        out.push(0);
        let mut len_buf = [0u8; 2];
        BigEndian::write_u16(&mut len_buf, total_len as u16);
        out.extend_from_slice(&len_buf);
        out.push(self.number);
        out.push(self.protocol_id);
        out.push(self.spi.len() as u8);
        out.push(self.transforms.len() as u8);
        out.extend_from_slice(&self.spi);
        out.extend_from_slice(&transform_bytes);
        out
    }

    fn decode(body: &[u8]) -> Result<Proposal> {
        if body.len() < 4 {
            return Err(IkeError::MalformedPayload("proposal body too short"));
        }
        let number = body[0];
        let protocol_id = body[1];
        let spi_size = body[2] as usize;
        let num_transforms = body[3] as usize;
        if body.len() < 4 + spi_size {
            return Err(IkeError::MalformedPayload("proposal SPI truncated"));
        }
        let spi = body[4..4 + spi_size].to_vec();
        let mut transforms = Vec::with_capacity(num_transforms);
        let mut offset = 4 + spi_size;
        for _ in 0..num_transforms {
            if offset + GENERIC_PAYLOAD_HEADER_LEN > body.len() {
                return Err(IkeError::MalformedPayload("transform list truncated"));
            }
            let len = BigEndian::read_u16(&body[offset + 2..offset + 4]) as usize;
            if len < GENERIC_PAYLOAD_HEADER_LEN || offset + len > body.len() {
                return Err(IkeError::MalformedPayload("transform length out of range"));
            }
            transforms.push(Transform::decode(&body[offset + GENERIC_PAYLOAD_HEADER_LEN..offset + len])?);
            offset += len;
        }
        Ok(Proposal { number, protocol_id, spi, transforms })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaPayload {
    pub doi: u32,
    pub situation: u32,
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// The SA payload body, exactly as it contributes to `SAi_b` in the
    /// `HASH_I`/`HASH_R` computation (RFC 2409 section 5).
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, self.doi);
        out.extend_from_slice(&buf);
        BigEndian::write_u32(&mut buf, self.situation);
        out.extend_from_slice(&buf);
        for (i, p) in self.proposals.iter().enumerate() {
            out.extend_from_slice(&p.encode(i + 1 == self.proposals.len()));
        }
        out
    }

    fn decode_body(body: &[u8]) -> Result<SaPayload> {
        if body.len() < 8 {
            return Err(IkeError::MalformedPayload("SA body too short"));
        }
        let doi = BigEndian::read_u32(&body[0..4]);
        let situation = BigEndian::read_u32(&body[4..8]);
        let mut proposals = Vec::new();
        let mut offset = 8;
        while offset + GENERIC_PAYLOAD_HEADER_LEN <= body.len() {
            let len = BigEndian::read_u16(&body[offset + 2..offset + 4]) as usize;
            if len < GENERIC_PAYLOAD_HEADER_LEN || offset + len > body.len() {
                return Err(IkeError::MalformedPayload("proposal length out of range"));
            }
            proposals.push(Proposal::decode(&body[offset + GENERIC_PAYLOAD_HEADER_LEN..offset + len])?);
            offset += len;
        }
        Ok(SaPayload { doi, situation, proposals })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPayload {
    pub id_type: u8,
    pub protocol_id: u8,
    pub port: u16,
    pub data: Vec<u8>,
}

impl IdPayload {
    /// The ID payload body, exactly as it contributes to `IDii_b`/
    /// `IDir_b` in the `HASH_I`/`HASH_R` computation.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.push(self.id_type);
        out.push(self.protocol_id);
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, self.port);
        out.extend_from_slice(&buf);
        out.extend_from_slice(&self.data);
        out
    }

    fn decode_body(body: &[u8]) -> Result<IdPayload> {
        if body.len() < 4 {
            return Err(IkeError::MalformedPayload("ID body too short"));
        }
        Ok(IdPayload {
            id_type: body[0],
            protocol_id: body[1],
            port: BigEndian::read_u16(&body[2..4]),
            data: body[4..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPayload {
    pub cert_type: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    pub doi: u32,
    pub protocol_id: u8,
    pub spi: Vec<u8>,
    pub message_type: u16,
    pub data: Vec<u8>,
}

impl NotifyPayload {
    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf4 = [0u8; 4];
        BigEndian::write_u32(&mut buf4, self.doi);
        out.extend_from_slice(&buf4);
        out.push(self.protocol_id);
        out.push(self.spi.len() as u8);
        let mut buf2 = [0u8; 2];
        BigEndian::write_u16(&mut buf2, self.message_type);
        out.extend_from_slice(&buf2);
        out.extend_from_slice(&self.spi);
        out.extend_from_slice(&self.data);
        out
    }

    fn decode_body(body: &[u8]) -> Result<NotifyPayload> {
        if body.len() < 8 {
            return Err(IkeError::MalformedPayload("Notify body too short"));
        }
        let doi = BigEndian::read_u32(&body[0..4]);
        let protocol_id = body[4];
        let spi_size = body[5] as usize;
        let message_type = BigEndian::read_u16(&body[6..8]);
        if body.len() < 8 + spi_size {
            return Err(IkeError::MalformedPayload("Notify SPI truncated"));
        }
        let spi = body[8..8 + spi_size].to_vec();
        let data = body[8 + spi_size..].to_vec();
        Ok(NotifyPayload { doi, protocol_id, spi, message_type, data })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    pub doi: u32,
    pub protocol_id: u8,
    pub spi_size: u8,
    pub spis: Vec<Vec<u8>>,
}

impl DeletePayload {
    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf4 = [0u8; 4];
        BigEndian::write_u32(&mut buf4, self.doi);
        out.extend_from_slice(&buf4);
        out.push(self.protocol_id);
        out.push(self.spi_size);
        let mut buf2 = [0u8; 2];
        BigEndian::write_u16(&mut buf2, self.spis.len() as u16);
        out.extend_from_slice(&buf2);
        for spi in &self.spis {
            out.extend_from_slice(spi);
        }
        out
    }

    fn decode_body(body: &[u8]) -> Result<DeletePayload> {
        if body.len() < 8 {
            return Err(IkeError::MalformedPayload("Delete body too short"));
        }
        let doi = BigEndian::read_u32(&body[0..4]);
        let protocol_id = body[4];
        let spi_size = body[5] as usize;
        let num_spis = BigEndian::read_u16(&body[6..8]) as usize;
        let mut spis = Vec::with_capacity(num_spis);
        let mut offset = 8;
        for _ in 0..num_spis {
            if offset + spi_size > body.len() {
                return Err(IkeError::MalformedPayload("Delete SPI list truncated"));
            }
            spis.push(body[offset..offset + spi_size].to_vec());
            offset += spi_size;
        }
        Ok(DeletePayload { doi, protocol_id, spi_size: spi_size as u8, spis })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Sa(SaPayload),
    KeyExchange(Vec<u8>),
    Id(IdPayload),
    Cert(CertPayload),
    CertRequest(u8),
    Hash(Vec<u8>),
    Signature(Vec<u8>),
    Nonce(Vec<u8>),
    Notify(NotifyPayload),
    Delete(DeletePayload),
    VendorId(Vec<u8>),
}

impl Payload {
    fn payload_type(&self) -> wire::PayloadType {
        use wire::PayloadType::*;
        match self {
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
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        match self {
            Payload::Sa(sa) => sa.encode_body(),
            Payload::KeyExchange(bytes) => bytes.clone(),
            Payload::Id(id) => id.encode_body(),
            Payload::Cert(cert) => {
                let mut out = vec![cert.cert_type];
                out.extend_from_slice(&cert.data);
                out
            }
            Payload::CertRequest(cert_type) => vec![*cert_type],
            Payload::Hash(bytes) => bytes.clone(),
            Payload::Signature(bytes) => bytes.clone(),
            Payload::Nonce(bytes) => bytes.clone(),
            Payload::Notify(notify) => notify.encode_body(),
            Payload::Delete(delete) => delete.encode_body(),
            Payload::VendorId(bytes) => bytes.clone(),
        }
    }

    fn decode_body(payload_type: wire::PayloadType, body: &[u8]) -> Result<Payload> {
        use wire::PayloadType::*;
        Ok(match payload_type {
            Sa => Payload::Sa(SaPayload::decode_body(body)?),
            KeyExchange => Payload::KeyExchange(body.to_vec()),
            Id => Payload::Id(IdPayload::decode_body(body)?),
            Cert => {
                if body.is_empty() {
                    return Err(IkeError::MalformedPayload("Cert body empty"));
                }
                Payload::Cert(CertPayload { cert_type: body[0], data: body[1..].to_vec() })
            }
            CertRequest => {
                if body.is_empty() {
                    return Err(IkeError::MalformedPayload("CertRequest body empty"));
                }
                Payload::CertRequest(body[0])
            }
            Hash => Payload::Hash(body.to_vec()),
            Signature => Payload::Signature(body.to_vec()),
            Nonce => Payload::Nonce(body.to_vec()),
            Notify => Payload::Notify(NotifyPayload::decode_body(body)?),
            Delete => Payload::Delete(DeletePayload::decode_body(body)?),
            VendorId => Payload::VendorId(body.to_vec()),
            PayloadType::None | Proposal | Transform => {
                return Err(IkeError::MalformedPayload("not a top-level payload type"))
            }
        })
    }
}

/// Encodes a payload chain, filling in each generic payload header's
/// `next_payload` field from the type of the payload that follows (0
/// for the last one).
pub fn encode_chain(payloads: &[Payload]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        let next_type = payloads
            .get(i + 1)
            .map(|p| p.payload_type() as u8)
            .unwrap_or(wire::PayloadType::None as u8);
        let body = payload.encode_body();
        let total_len = GENERIC_PAYLOAD_HEADER_LEN + body.len();
        out.push(next_type);
        out.push(0);
        let mut len_buf = [0u8; 2];
        BigEndian::write_u16(&mut len_buf, total_len as u16);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&body);
    }
    out
}

/// Walks a payload chain starting from `first_payload_type` (the
/// ISAKMP header's `next_payload` field) over `data`.
pub fn decode_chain(first_payload_type: u8, data: &[u8]) -> Result<Vec<Payload>> {
    let mut payloads = Vec::new();
    let mut current_type = first_payload_type;
    let mut offset = 0;
    while current_type != wire::PayloadType::None as u8 {
        if offset + GENERIC_PAYLOAD_HEADER_LEN > data.len() {
            return Err(IkeError::MalformedPayload("payload chain truncated"));
        }
        let next_payload = data[offset];
        let len = BigEndian::read_u16(&data[offset + 2..offset + 4]) as usize;
        if len < GENERIC_PAYLOAD_HEADER_LEN || offset + len > data.len() {
            return Err(IkeError::MalformedPayload("payload length out of range"));
        }
        let payload_type = wire::PayloadType::from_u8(current_type)
            .ok_or(IkeError::MalformedPayload("unknown payload type in chain"))?;
        let body = &data[offset + GENERIC_PAYLOAD_HEADER_LEN..offset + len];
        payloads.push(Payload::decode_body(payload_type, body)?);
        offset += len;
        current_type = next_payload;
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sa_payload_roundtrip() {
        let sa = Payload::Sa(SaPayload {
            doi: wire::DOI_IPSEC,
            situation: wire::SITUATION_IDENTITY_ONLY,
            proposals: vec![Proposal {
                number: 1,
                protocol_id: wire::ProtocolId::Ike as u8,
                spi: vec![],
                transforms: vec![Transform::phase1(1, phase1_attr::CRYPTO_DES_CBC, phase1_attr::AUTH_METHOD_PSK, 28800)],
            }],
        });
        let chain = encode_chain(std::slice::from_ref(&sa));
        let decoded = decode_chain(wire::PayloadType::Sa as u8, &chain).unwrap();
        assert_eq!(decoded, vec![sa]);
    }

    #[test]
    fn nonce_and_id_roundtrip() {
        let nonce = Payload::Nonce(vec![1, 2, 3, 4]);
        let id = Payload::Id(IdPayload {
            id_type: wire::IdType::Ipv4Addr as u8,
            protocol_id: 0,
            port: 0,
            data: vec![10, 0, 0, 1],
        });
        let chain = encode_chain(&[nonce.clone(), id.clone()]);
        let decoded = decode_chain(wire::PayloadType::Nonce as u8, &chain).unwrap();
        assert_eq!(decoded, vec![nonce, id]);
    }

    #[test]
    fn delete_payload_carries_spi_list() {
        let delete = Payload::Delete(DeletePayload {
            doi: wire::DOI_IPSEC,
            protocol_id: wire::ProtocolId::IpsecEsp as u8,
            spi_size: 4,
            spis: vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]],
        });
        let chain = encode_chain(std::slice::from_ref(&delete));
        let decoded = decode_chain(wire::PayloadType::Delete as u8, &chain).unwrap();
        assert_eq!(decoded, vec![delete]);
    }
}
