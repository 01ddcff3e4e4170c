//! Phase-1 (Main Mode and Aggressive Mode) message construction and
//! processing. Functions here mutate an `IkeSa` in place and return
//! either an `IkeMessage` ready to serialize (cleartext messages) or
//! the already-framed wire bytes (encrypted messages).

use std::convert::TryInto;
use std::net::IpAddr;

use vpn_crypto::des_cbc::{DES_KEY_LEN, TRIPLE_DES_KEY_LEN};
use vpn_crypto::dh::DiffieHellman;
use vpn_crypto::rand::random_bytes;
use vpn_crypto::rsa_sig::{RsaSigner, RsaVerifier};

use crate::codec::payload::{IdPayload, Payload, Proposal, SaPayload, Transform};
use crate::codec::wire::{self, phase1_attr, ExchangeType};
use crate::codec::{IkeMessage, IsakmpHeader};
use crate::error::{IkeError, Result};
use crate::kdf;
use crate::sa::{AuthMethod, IkeSa, Phase1Role, Phase1State};

const NONCE_LEN: usize = 20;

fn header(sa: &IkeSa, exchange_type: ExchangeType, flags: u8) -> IsakmpHeader {
    IsakmpHeader {
        initiator_cookie: sa.initiator_cookie,
        responder_cookie: sa.responder_cookie,
        next_payload: 0,
        exchange_type,
        flags,
        message_id: 0,
    }
}

/// Maps a negotiated Phase-1 `CRYPTO` attribute value to the cipher's
/// key length, so callers can size `expand_cipher_key`'s output.
pub fn cipher_key_len(crypto: u16) -> usize {
    if crypto == phase1_attr::CRYPTO_3DES_CBC {
        TRIPLE_DES_KEY_LEN
    } else {
        DES_KEY_LEN
    }
}

/// Message 1: `HDR, SA` — propose crypto/hash/auth/DH-group/lifetime.
pub fn build_msg1(sa: &mut IkeSa, crypto: u16, life_seconds: u16) -> IkeMessage {
    let auth_value = match sa.auth_method {
        AuthMethod::PreSharedKey => phase1_attr::AUTH_METHOD_PSK,
        AuthMethod::RsaSignature => phase1_attr::AUTH_METHOD_RSA_SIG,
    };
    let sa_payload = SaPayload {
        doi: wire::DOI_IPSEC,
        situation: wire::SITUATION_IDENTITY_ONLY,
        proposals: vec![Proposal {
            number: 1,
            protocol_id: wire::ProtocolId::Ike as u8,
            spi: Vec::new(),
            transforms: vec![Transform::phase1(1, crypto, auth_value, life_seconds)],
        }],
    };
    sa.sa_i_b = sa_payload.encode_body();
    sa.phase1_state = Phase1State::SentMsg1;
    IkeMessage::new(header(sa, ExchangeType::Main, 0), vec![Payload::Sa(sa_payload)])
}

/// Responder's message 2: accept exactly one proposal/transform and
/// record the responder cookie and chosen cipher.
pub fn handle_msg2(sa: &mut IkeSa, msg: &IkeMessage) -> Result<u16> {
    if sa.phase1_state != Phase1State::SentMsg1 {
        return Err(IkeError::UnexpectedMessage(sa.phase1_state));
    }
    sa.responder_cookie = msg.header.responder_cookie;
    let accepted = msg
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Sa(sa_payload) => sa_payload.proposals.first().and_then(|prop| prop.transforms.first()),
            _ => None,
        })
        .ok_or(IkeError::NoAcceptableProposal)?;
    let crypto = accepted.attr(phase1_attr::CRYPTO).ok_or(IkeError::NoAcceptableProposal)?;
    sa.phase1_state = Phase1State::SentMsg1;
    Ok(crypto)
}

/// Message 3: `HDR, KE, Ni` — our DH public value and nonce.
pub fn build_msg3(sa: &mut IkeSa) -> IkeMessage {
    let dh = DiffieHellman::generate();
    let ke_bytes = dh.public_key_bytes();
    let nonce = random_bytes(NONCE_LEN);
    sa.nonce_i = nonce.clone();
    sa.dh = Some(dh);
    sa.phase1_state = Phase1State::SentMsg3;
    IkeMessage::new(
        header(sa, ExchangeType::Main, 0),
        vec![Payload::KeyExchange(ke_bytes), Payload::Nonce(nonce)],
    )
}

/// Message 4: extract the peer's `g^y`/`Nr`, derive the shared secret
/// and every `SKEYID*` key, and the Phase-1 IV.
pub fn handle_msg4(sa: &mut IkeSa, msg: &IkeMessage, psk: Option<&[u8]>, cipher_key_len_hint: usize) -> Result<()> {
    if sa.phase1_state != Phase1State::SentMsg3 {
        return Err(IkeError::UnexpectedMessage(sa.phase1_state));
    }
    let peer_ke = msg
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::KeyExchange(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("message 4 missing KE"))?;
    let peer_nonce = msg
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Nonce(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("message 4 missing Ni"))?;

    let dh = sa.dh.as_ref().expect("build_msg3 must run before handle_msg4");
    let shared_secret = dh.shared_secret(&peer_ke)?;
    let our_public = dh.public_key_bytes();

    sa.nonce_r = peer_nonce;
    sa.peer_dh_public = Some(peer_ke);

    let skeyid = match sa.auth_method {
        AuthMethod::PreSharedKey => kdf::skeyid_psk(psk.expect("PSK auth requires a pre-shared key"), &sa.nonce_i, &sa.nonce_r),
        AuthMethod::RsaSignature => kdf::skeyid_rsa_sig(&sa.nonce_i, &sa.nonce_r, &shared_secret),
    };
    let skeyid_d = kdf::skeyid_d(&skeyid, &shared_secret, sa.initiator_cookie, sa.responder_cookie);
    let skeyid_a = kdf::skeyid_a(&skeyid, &skeyid_d, &shared_secret, sa.initiator_cookie, sa.responder_cookie);
    let skeyid_e_seed = kdf::skeyid_e(&skeyid, &skeyid_a, &shared_secret, sa.initiator_cookie, sa.responder_cookie);
    let skeyid_e = kdf::expand_cipher_key(&skeyid_e_seed, cipher_key_len_hint);

    sa.phase1_iv = Some(kdf::phase1_iv(&our_public, &sa.peer_dh_public.as_ref().unwrap().clone(), 8));
    sa.shared_secret = Some(shared_secret);
    sa.skeyid = Some(skeyid);
    sa.skeyid_d = Some(skeyid_d);
    sa.skeyid_a = Some(skeyid_a);
    sa.skeyid_e = Some(skeyid_e);
    sa.phase1_state = Phase1State::SentMsg5;
    Ok(())
}

/// Message 5 (encrypted): `HDR*, IDii, [CERT,] SIG_I | HASH_I`.
pub fn build_msg5(
    sa: &mut IkeSa,
    id_ii: IdPayload,
    cert_der: Option<Vec<u8>>,
    rsa_signer: Option<&RsaSigner>,
) -> Result<Vec<u8>> {
    sa.id_ii_b = id_ii.encode_body();
    let our_public = sa.dh.as_ref().unwrap().public_key_bytes();
    let peer_public = sa.peer_dh_public.as_ref().unwrap().clone();
    let digest = kdf::hash_i(
        sa.skeyid.as_ref().unwrap(),
        &our_public,
        &peer_public,
        sa.initiator_cookie,
        sa.responder_cookie,
        &sa.sa_i_b,
        &sa.id_ii_b,
    );

    let mut payloads = vec![Payload::Id(id_ii)];
    if let Some(cert) = cert_der {
        payloads.push(Payload::Cert(crate::codec::payload::CertPayload {
            cert_type: wire::CERT_TYPE_X509_SIGNATURE,
            data: cert,
        }));
    }
    match sa.auth_method {
        AuthMethod::PreSharedKey => payloads.push(Payload::Hash(digest.to_vec())),
        AuthMethod::RsaSignature => {
            let signer = rsa_signer.expect("RSA-SIG auth requires a signer");
            payloads.push(Payload::Signature(signer.sign_sha1(&digest)?));
        }
    }

    let message = IkeMessage::new(header(sa, ExchangeType::Main, 0), payloads);
    let key = sa.skeyid_e.as_ref().unwrap();
    let iv: [u8; 8] = sa.phase1_iv.as_ref().unwrap()[..8].try_into().unwrap();
    sa.phase1_state = Phase1State::SentMsg5;
    message.encode_encrypted(key, &iv).map_err(Into::into)
}

/// Message 6 (encrypted): verify the peer's `IDir`/`SIG_R`|`HASH_R` and
/// move the IKE SA to `Established`.
pub fn handle_msg6(sa: &mut IkeSa, wire_bytes: &[u8], rsa_verifier: Option<&RsaVerifier>) -> Result<()> {
    if sa.phase1_state != Phase1State::SentMsg5 {
        return Err(IkeError::UnexpectedMessage(sa.phase1_state));
    }
    let key = sa.skeyid_e.as_ref().unwrap().clone();
    let iv: [u8; 8] = sa.phase1_iv.as_ref().unwrap()[..8].try_into().unwrap();
    let message = IkeMessage::decode(wire_bytes, &key, &iv)?;

    let id_ir = message
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Id(id) => Some(id.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("message 6 missing IDir"))?;
    sa.id_ir_b = id_ir.encode_body();

    let our_public = sa.dh.as_ref().unwrap().public_key_bytes();
    let peer_public = sa.peer_dh_public.as_ref().unwrap().clone();
    let expected = kdf::hash_r(
        sa.skeyid.as_ref().unwrap(),
        &our_public,
        &peer_public,
        sa.initiator_cookie,
        sa.responder_cookie,
        &sa.sa_i_b,
        &sa.id_ir_b,
    );

    let authenticated = message.payloads.iter().any(|p| match (sa.auth_method, p) {
        (AuthMethod::PreSharedKey, Payload::Hash(h)) => h.as_slice() == expected,
        (AuthMethod::RsaSignature, Payload::Signature(sig)) => rsa_verifier
            .map(|v| v.verify_sha1(&expected, sig).is_ok())
            .unwrap_or(false),
        _ => false,
    });
    if !authenticated {
        sa.mark_dead();
        return Err(match sa.auth_method {
            AuthMethod::PreSharedKey => IkeError::HashMismatch,
            AuthMethod::RsaSignature => IkeError::SignatureInvalid,
        });
    }

    sa.phase1_state = Phase1State::Established;
    sa.established = true;
    sa.phase1_established_tick = Some(std::time::Instant::now());
    sa.touch(wire_bytes.len() as u64);
    Ok(())
}

/// Aggressive mode message 1: `SA, KE, Ni, IDii`, all in the clear.
pub fn build_aggressive_msg1(sa: &mut IkeSa, crypto: u16, life_seconds: u16, id_ii: IdPayload) -> IkeMessage {
    let auth_value = match sa.auth_method {
        AuthMethod::PreSharedKey => phase1_attr::AUTH_METHOD_PSK,
        AuthMethod::RsaSignature => phase1_attr::AUTH_METHOD_RSA_SIG,
    };
    let sa_payload = SaPayload {
        doi: wire::DOI_IPSEC,
        situation: wire::SITUATION_IDENTITY_ONLY,
        proposals: vec![Proposal {
            number: 1,
            protocol_id: wire::ProtocolId::Ike as u8,
            spi: Vec::new(),
            transforms: vec![Transform::phase1(1, crypto, auth_value, life_seconds)],
        }],
    };
    sa.sa_i_b = sa_payload.encode_body();
    sa.id_ii_b = id_ii.encode_body();

    let dh = DiffieHellman::generate();
    let ke_bytes = dh.public_key_bytes();
    let nonce = random_bytes(NONCE_LEN);
    sa.nonce_i = nonce.clone();
    sa.dh = Some(dh);
    sa.phase1_state = Phase1State::SentAggressiveMsg1;

    IkeMessage::new(
        header(sa, ExchangeType::Aggressive, 0),
        vec![Payload::Sa(sa_payload), Payload::KeyExchange(ke_bytes), Payload::Nonce(nonce), Payload::Id(id_ii)],
    )
}

/// Aggressive mode message 2: `SA, KE, Nr, IDir, [CERT,] HASH_R`, sent
/// in the clear (only the final message is optionally encrypted).
pub fn handle_aggressive_msg2(sa: &mut IkeSa, msg: &IkeMessage, psk: Option<&[u8]>, cipher_key_len_hint: usize) -> Result<()> {
    if sa.phase1_state != Phase1State::SentAggressiveMsg1 {
        return Err(IkeError::UnexpectedMessage(sa.phase1_state));
    }
    sa.responder_cookie = msg.header.responder_cookie;

    let peer_ke = msg
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::KeyExchange(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("aggressive message 2 missing KE"))?;
    let peer_nonce = msg
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Nonce(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("aggressive message 2 missing Nr"))?;
    let id_ir = msg
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Id(id) => Some(id.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("aggressive message 2 missing IDir"))?;

    let dh = sa.dh.as_ref().expect("build_aggressive_msg1 must run first");
    let shared_secret = dh.shared_secret(&peer_ke)?;
    let our_public = dh.public_key_bytes();

    sa.nonce_r = peer_nonce;
    sa.id_ir_b = id_ir.encode_body();
    sa.peer_dh_public = Some(peer_ke);

    let skeyid = match sa.auth_method {
        AuthMethod::PreSharedKey => kdf::skeyid_psk(psk.expect("PSK auth requires a pre-shared key"), &sa.nonce_i, &sa.nonce_r),
        AuthMethod::RsaSignature => kdf::skeyid_rsa_sig(&sa.nonce_i, &sa.nonce_r, &shared_secret),
    };
    let skeyid_d = kdf::skeyid_d(&skeyid, &shared_secret, sa.initiator_cookie, sa.responder_cookie);
    let skeyid_a = kdf::skeyid_a(&skeyid, &skeyid_d, &shared_secret, sa.initiator_cookie, sa.responder_cookie);
    let skeyid_e_seed = kdf::skeyid_e(&skeyid, &skeyid_a, &shared_secret, sa.initiator_cookie, sa.responder_cookie);
    let skeyid_e = kdf::expand_cipher_key(&skeyid_e_seed, cipher_key_len_hint);

    sa.phase1_iv = Some(kdf::phase1_iv(&our_public, &sa.peer_dh_public.as_ref().unwrap().clone(), 8));
    sa.shared_secret = Some(shared_secret);
    sa.skeyid = Some(skeyid);
    sa.skeyid_d = Some(skeyid_d);
    sa.skeyid_a = Some(skeyid_a);
    sa.skeyid_e = Some(skeyid_e);

    let expected = kdf::hash_r(
        sa.skeyid.as_ref().unwrap(),
        &our_public,
        sa.peer_dh_public.as_ref().unwrap(),
        sa.initiator_cookie,
        sa.responder_cookie,
        &sa.sa_i_b,
        &sa.id_ir_b,
    );
    let authenticated = msg.payloads.iter().any(|p| matches!(p, Payload::Hash(h) if h.as_slice() == expected));
    if !authenticated {
        sa.mark_dead();
        return Err(IkeError::HashMismatch);
    }
    Ok(())
}

/// Aggressive mode message 3: `HASH_I`, encrypted unless the
/// compatibility flag requests cleartext (see `SPEC_FULL.md` open
/// question on `VpnPhase1AggressiveCleartextHash`).
pub fn build_aggressive_msg3(sa: &mut IkeSa, cleartext_hash: bool) -> Result<Vec<u8>> {
    let our_public = sa.dh.as_ref().unwrap().public_key_bytes();
    let peer_public = sa.peer_dh_public.as_ref().unwrap().clone();
    let digest = kdf::hash_i(
        sa.skeyid.as_ref().unwrap(),
        &our_public,
        &peer_public,
        sa.initiator_cookie,
        sa.responder_cookie,
        &sa.sa_i_b,
        &sa.id_ii_b,
    );
    let message = IkeMessage::new(header(sa, ExchangeType::Aggressive, 0), vec![Payload::Hash(digest.to_vec())]);

    sa.phase1_state = Phase1State::Established;
    sa.established = true;
    sa.phase1_established_tick = Some(std::time::Instant::now());

    if cleartext_hash {
        Ok(message.encode())
    } else {
        let key = sa.skeyid_e.as_ref().unwrap();
        let iv: [u8; 8] = sa.phase1_iv.as_ref().unwrap()[..8].try_into().unwrap();
        message.encode_encrypted(key, &iv).map_err(Into::into)
    }
}

pub fn our_ike_id(role_addr: IpAddr) -> IdPayload {
    match role_addr {
        IpAddr::V4(v4) => IdPayload {
            id_type: wire::IdType::Ipv4Addr as u8,
            protocol_id: 0,
            port: 0,
            data: v4.octets().to_vec(),
        },
        IpAddr::V6(v6) => IdPayload {
            id_type: wire::IdType::Ipv6Addr as u8,
            protocol_id: 0,
            port: 0,
            data: v6.octets().to_vec(),
        },
    }
}
