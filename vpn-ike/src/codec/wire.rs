//! Exact on-the-wire IKEv1 constants, transcribed from the reference
//! implementation's `SeIke.h`. Kept as enums rather than bare `u8`
//! literals scattered through match arms.

/// ISAKMP header version byte: major nibble 1, minor nibble 0.
pub const IKE_VERSION: u8 = 0x10;

pub const ISAKMP_HEADER_LEN: usize = 28;
pub const GENERIC_PAYLOAD_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    None = 0,
    Sa = 1,
    Proposal = 2,
    Transform = 3,
    KeyExchange = 4,
    Id = 5,
    Cert = 6,
    CertRequest = 7,
    Hash = 8,
    Signature = 9,
    Nonce = 10,
    Notify = 11,
    Delete = 12,
    VendorId = 13,
}

impl PayloadType {
    pub fn from_u8(value: u8) -> Option<PayloadType> {
        use PayloadType::*;
        Some(match value {
            0 => None,
            1 => Sa,
            2 => Proposal,
            3 => Transform,
            4 => KeyExchange,
            5 => Id,
            6 => Cert,
            7 => CertRequest,
            8 => Hash,
            9 => Signature,
            10 => Nonce,
            11 => Notify,
            12 => Delete,
            13 => VendorId,
            _ => return Option::None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExchangeType {
    Main = 2,
    Aggressive = 4,
    Informational = 5,
    Quick = 32,
}

impl ExchangeType {
    pub fn from_u8(value: u8) -> Option<ExchangeType> {
        Some(match value {
            2 => ExchangeType::Main,
            4 => ExchangeType::Aggressive,
            5 => ExchangeType::Informational,
            32 => ExchangeType::Quick,
            _ => return None,
        })
    }
}

pub mod header_flag {
    pub const ENCRYPTED: u8 = 1;
    pub const COMMIT: u8 = 2;
    pub const AUTH_ONLY: u8 = 4;
}

pub const DOI_IPSEC: u32 = 1;
pub const SITUATION_IDENTITY_ONLY: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolId {
    Ike = 1,
    IpsecAh = 2,
    IpsecEsp = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase1TransformId {
    Ike = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase2TransformId {
    EspDes = 2,
    Esp3Des = 3,
}

/// Phase-1 SA transform attribute types (RFC 2409 Appendix A).
pub mod phase1_attr {
    pub const CRYPTO: u16 = 1;
    pub const HASH: u16 = 2;
    pub const AUTH_METHOD: u16 = 3;
    pub const DH_GROUP: u16 = 4;
    pub const LIFE_TYPE: u16 = 11;
    pub const LIFE_VALUE: u16 = 12;
    pub const KEY_SIZE: u16 = 14;

    pub const CRYPTO_DES_CBC: u16 = 1;
    pub const CRYPTO_3DES_CBC: u16 = 5;
    pub const HASH_SHA1: u16 = 2;
    pub const AUTH_METHOD_PSK: u16 = 1;
    pub const AUTH_METHOD_RSA_SIG: u16 = 3;
    pub const DH_GROUP_1024_MODP: u16 = 2;
    pub const LIFE_TYPE_SECONDS: u16 = 1;
    pub const LIFE_TYPE_KILOBYTES: u16 = 2;
}

/// Phase-2 (Quick Mode / IPsec) SA transform attribute types.
pub mod phase2_attr {
    pub const LIFE_TYPE: u16 = 1;
    pub const LIFE: u16 = 2;
    pub const DH_GROUP: u16 = 3;
    pub const CAPSULE: u16 = 4;
    pub const HMAC: u16 = 5;
    pub const KEY_SIZE: u16 = 6;

    pub const HMAC_SHA1: u16 = 2;
    pub const DH_GROUP_1024_MODP: u16 = 2;
    pub const CAPSULE_TUNNEL: u16 = 1;
    pub const LIFE_TYPE_SECONDS: u16 = 1;
    pub const LIFE_TYPE_KILOBYTES: u16 = 2;
}

/// The AF bit marks a transform attribute as TV (fixed 2-byte value)
/// rather than TLV; every attribute this engine emits or expects is TV.
pub const ATTR_AF_TV: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdType {
    Ipv4Addr = 1,
    Fqdn = 2,
    UserFqdn = 3,
    Ipv4AddrSubnet = 4,
    Ipv6Addr = 5,
    Ipv6AddrSubnet = 6,
    DerAsn1Dn = 9,
    DerAsn1Gn = 10,
}

pub const CERT_TYPE_X509_SIGNATURE: u8 = 4;
