//! Quick Mode (Phase-2) message construction and processing: three
//! messages, all encrypted under the Phase-1 `SKEYID_e` key with a
//! fresh per-message IV derived from the running Phase-1/Phase-2 IV
//! chain, ending in a `KEYMAT` derivation for each ESP direction.

use std::convert::TryInto;

use vpn_crypto::rand::random_bytes;

use crate::codec::payload::{Payload, Proposal, SaPayload, Transform};
use crate::codec::wire::{self, phase2_attr, ExchangeType};
use crate::codec::{IkeMessage, IsakmpHeader};
use crate::error::{IkeError, Result};
use crate::kdf;
use crate::sa::{IkeSa, Phase2State};

const NONCE_LEN: usize = 20;

fn header(sa: &IkeSa, message_id: u32) -> IsakmpHeader {
    IsakmpHeader {
        initiator_cookie: sa.initiator_cookie,
        responder_cookie: sa.responder_cookie,
        next_payload: 0,
        exchange_type: ExchangeType::Quick,
        flags: wire::header_flag::ENCRYPTED,
        message_id,
    }
}

/// Message 1*: `HDR*, HASH(1), SA, Ni', [IDci, IDcr]`. `our_spi` is the
/// SPI we are offering the peer for the SA they will key toward us.
pub fn build_msg1(sa: &mut IkeSa, transform_id: u8, life_seconds: u16, id_ci_cr: Option<(Payload, Payload)>) -> Result<Vec<u8>> {
    let message_id = vpn_crypto::rand::random_u32();
    sa.phase2_message_id = message_id;

    let sa_payload = SaPayload {
        doi: wire::DOI_IPSEC,
        situation: wire::SITUATION_IDENTITY_ONLY,
        proposals: vec![Proposal {
            number: 1,
            protocol_id: wire::ProtocolId::IpsecEsp as u8,
            spi: sa.our_spi.to_be_bytes().to_vec(),
            transforms: vec![Transform::phase2(1, transform_id, life_seconds)],
        }],
    };
    let sa_bytes = sa_payload.encode_body();
    let nonce = random_bytes(NONCE_LEN);
    sa.phase2_nonce_i = nonce.clone();

    let id_bytes: Vec<u8> = id_ci_cr
        .as_ref()
        .map(|(ci, cr)| {
            let mut v = encode_payload_body(ci);
            v.extend_from_slice(&encode_payload_body(cr));
            v
        })
        .unwrap_or_default();

    let digest = kdf::hash1(sa.skeyid_a.as_ref().unwrap(), message_id, &sa_bytes, &nonce, &[], &id_bytes);

    let mut payloads = vec![Payload::Hash(digest.to_vec()), Payload::Sa(sa_payload), Payload::Nonce(nonce)];
    if let Some((ci, cr)) = id_ci_cr {
        payloads.push(ci);
        payloads.push(cr);
    }

    let iv8 = sa.advance_phase2_iv(message_id);
    sa.phase2_state = Phase2State::Sending;
    let message = IkeMessage::new(header(sa, message_id), payloads);
    message.encode_encrypted(sa.skeyid_e.as_ref().unwrap(), &iv8).map_err(Into::into)
}

/// Message 2*: decodes and verifies `HASH(2)`, records `Nr'` and the
/// peer's chosen proposal/SPI.
pub fn handle_msg2(sa: &mut IkeSa, wire_bytes: &[u8]) -> Result<Proposal> {
    if sa.phase2_state != Phase2State::Sending {
        return Err(IkeError::MalformedPayload("Quick Mode message 2 received out of order"));
    }
    let iv = sa.phase2_iv.clone().expect("build_msg1 sets phase2_iv");
    let iv8: [u8; 8] = iv[..8].try_into().unwrap();
    let message = IkeMessage::decode(wire_bytes, sa.skeyid_e.as_ref().unwrap(), &iv8)?;

    let sa_payload = message
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Sa(s) => Some(s.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("Quick Mode message 2 missing SA"))?;
    let nonce_r = message
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Nonce(n) => Some(n.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("Quick Mode message 2 missing Nr'"))?;
    let digest = message
        .payloads
        .iter()
        .find_map(|p| match p {
            Payload::Hash(h) => Some(h.clone()),
            _ => None,
        })
        .ok_or(IkeError::MalformedPayload("Quick Mode message 2 missing HASH(2)"))?;

    let sa_bytes = sa_payload.encode_body();
    let expected = kdf::hash2(
        sa.skeyid_a.as_ref().unwrap(),
        message.header.message_id,
        &sa_bytes,
        &sa.phase2_nonce_i.clone(),
        &nonce_r,
        &[],
        &[],
    );
    if digest != expected {
        return Err(IkeError::HashMismatch);
    }

    let proposal = sa_payload.proposals.first().cloned().ok_or(IkeError::NoAcceptableProposal)?;
    sa.peer_spi = u32::from_be_bytes(proposal.spi.clone().try_into().map_err(|_| IkeError::MalformedPayload("peer ESP SPI must be 4 bytes"))?);
    sa.phase2_nonce_r = nonce_r;
    sa.phase2_state = Phase2State::SentMsg3Pending;
    Ok(proposal)
}

/// Message 3*: `HASH(3)`, the final confirmation. Installs `our_keymat`
/// / `peer_keymat` and moves to `Established`.
pub fn build_msg3(sa: &mut IkeSa, needed_key_len: usize) -> Result<Vec<u8>> {
    if sa.phase2_state != Phase2State::SentMsg3Pending {
        return Err(IkeError::MalformedPayload("Quick Mode message 3 built out of order"));
    }
    let digest = kdf::hash3(sa.skeyid_a.as_ref().unwrap(), sa.phase2_message_id, &sa.phase2_nonce_i.clone(), &sa.phase2_nonce_r.clone());
    let message = IkeMessage::new(header(sa, sa.phase2_message_id), vec![Payload::Hash(digest.to_vec())]);

    let iv8 = sa.advance_phase2_iv(sa.phase2_message_id);
    let wire_bytes = message.encode_encrypted(sa.skeyid_e.as_ref().unwrap(), &iv8)?;

    let protocol_id = wire::ProtocolId::IpsecEsp as u8;
    sa.our_keymat = Some(kdf::keymat(
        sa.skeyid_d.as_ref().unwrap(),
        protocol_id,
        &sa.our_spi.to_be_bytes(),
        &sa.phase2_nonce_i.clone(),
        &sa.phase2_nonce_r.clone(),
        needed_key_len,
    ));
    sa.peer_keymat = Some(kdf::keymat(
        sa.skeyid_d.as_ref().unwrap(),
        protocol_id,
        &sa.peer_spi.to_be_bytes(),
        &sa.phase2_nonce_i.clone(),
        &sa.phase2_nonce_r.clone(),
        needed_key_len,
    ));
    sa.phase2_state = Phase2State::Established;
    sa.phase2_started = true;
    Ok(wire_bytes)
}

fn encode_payload_body(payload: Payload) -> Vec<u8> {
    crate::codec::payload::encode_chain(std::slice::from_ref(&payload))
}

/// Maps a negotiated Phase-2 transform to the combined
/// `encryption_key | hmac_key` length KEYMAT must produce.
pub fn keymat_len(transform_id: u8) -> usize {
    let cipher_len = if transform_id == wire::Phase2TransformId::Esp3Des as u8 {
        vpn_crypto::des_cbc::TRIPLE_DES_KEY_LEN
    } else {
        vpn_crypto::des_cbc::DES_KEY_LEN
    };
    cipher_len + vpn_crypto::mac::HMAC_SHA1_LEN
}
