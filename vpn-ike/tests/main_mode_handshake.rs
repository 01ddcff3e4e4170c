//! Drives a full Main Mode + Quick Mode exchange against a hand-built
//! peer, exercising every state transition `vpn_runtime::engine` relies
//! on and checking the derived keys match RFC 2409's PSK formula.

use std::convert::TryInto;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use vpn_crypto::des_cbc::DES_KEY_LEN;
use vpn_crypto::dh::DiffieHellman;
use vpn_crypto::mac::HMAC_SHA1_LEN;

use vpn_ike::codec::payload::{IdPayload, Payload, Proposal, SaPayload, Transform};
use vpn_ike::codec::wire::{self, phase1_attr, ExchangeType, Phase2TransformId};
use vpn_ike::codec::{message_id_of, IkeMessage, IsakmpHeader};
use vpn_ike::{kdf, phase1, phase2};
use vpn_ike::{AuthMethod, IkeSa, Phase1State, Phase2State};

const PSK: &[u8] = b"secret";
const INITIATOR_COOKIE: u64 = 0x1111_1111_1111_1111;
const RESPONDER_COOKIE: u64 = 0x2222_2222_2222_2222;

#[test]
fn main_mode_psk_handshake_installs_phase2_sas() {
    let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));
    let mut sa = IkeSa::new(peer, 500, 500, AuthMethod::PreSharedKey, Duration::from_secs(30));
    sa.initiator_cookie = INITIATOR_COOKIE;

    let crypto = phase1_attr::CRYPTO_DES_CBC;
    let life_seconds = 28800u16;

    // Message 1: HDR, SA.
    let msg1 = phase1::build_msg1(&mut sa, crypto, life_seconds);
    let wire1 = msg1.encode();
    assert_eq!(sa.phase1_state, Phase1State::SentMsg1);

    // Peer accepts the lone proposal verbatim and assigns its cookie.
    let decoded1 = IkeMessage::decode(&wire1, &[0u8; 8], &[0u8; 8]).unwrap();
    let offered = match &decoded1.payloads[0] {
        Payload::Sa(sa_payload) => sa_payload.clone(),
        _ => panic!("message 1 must carry an SA payload"),
    };
    let msg2 = IkeMessage::new(
        IsakmpHeader {
            initiator_cookie: INITIATOR_COOKIE,
            responder_cookie: RESPONDER_COOKIE,
            next_payload: 0,
            exchange_type: ExchangeType::Main,
            flags: 0,
            message_id: 0,
        },
        vec![Payload::Sa(offered)],
    );
    let wire2 = msg2.encode();

    // Message 2: peer's cookie is recorded; state does not advance yet
    // (the initiator only moves on once it has sent message 3).
    let decoded2 = IkeMessage::decode(&wire2, &[0u8; 8], &[0u8; 8]).unwrap();
    phase1::handle_msg2(&mut sa, &decoded2).unwrap();
    assert_eq!(sa.responder_cookie, RESPONDER_COOKIE);
    assert_eq!(sa.phase1_state, Phase1State::SentMsg1);

    // Message 3: our KE/Ni.
    let msg3 = phase1::build_msg3(&mut sa);
    let wire3 = msg3.encode();
    assert_eq!(sa.phase1_state, Phase1State::SentMsg3);

    let decoded3 = IkeMessage::decode(&wire3, &[0u8; 8], &[0u8; 8]).unwrap();
    let peer_ke_i = match &decoded3.payloads[0] {
        Payload::KeyExchange(bytes) => bytes.clone(),
        _ => panic!("message 3 must lead with KE"),
    };
    let ni = match &decoded3.payloads[1] {
        Payload::Nonce(bytes) => bytes.clone(),
        _ => panic!("message 3 must carry Ni second"),
    };

    // Peer's own DH share and the matching SKEYID* chain.
    let responder_dh = DiffieHellman::generate();
    let responder_ke = responder_dh.public_key_bytes();
    let shared_secret = responder_dh.shared_secret(&peer_ke_i).unwrap();
    let nr: Vec<u8> = vec![0x42; 20];

    let skeyid = kdf::skeyid_psk(PSK, &ni, &nr);
    let skeyid_d = kdf::skeyid_d(&skeyid, &shared_secret, INITIATOR_COOKIE, RESPONDER_COOKIE);
    let skeyid_a = kdf::skeyid_a(&skeyid, &skeyid_d, &shared_secret, INITIATOR_COOKIE, RESPONDER_COOKIE);
    let skeyid_e_seed = kdf::skeyid_e(&skeyid, &skeyid_a, &shared_secret, INITIATOR_COOKIE, RESPONDER_COOKIE);
    let skeyid_e = kdf::expand_cipher_key(&skeyid_e_seed, DES_KEY_LEN);
    let phase1_iv = kdf::phase1_iv(&peer_ke_i, &responder_ke, 8);
    let phase1_iv8: [u8; 8] = phase1_iv[..8].try_into().unwrap();

    // Message 4: HDR, KE, Nr (cleartext).
    let msg4 = IkeMessage::new(
        IsakmpHeader {
            initiator_cookie: INITIATOR_COOKIE,
            responder_cookie: RESPONDER_COOKIE,
            next_payload: 0,
            exchange_type: ExchangeType::Main,
            flags: 0,
            message_id: 0,
        },
        vec![Payload::KeyExchange(responder_ke.clone()), Payload::Nonce(nr.clone())],
    );
    let wire4 = msg4.encode();

    let decoded4 = IkeMessage::decode(&wire4, &[0u8; 8], &[0u8; 8]).unwrap();
    phase1::handle_msg4(&mut sa, &decoded4, Some(PSK), DES_KEY_LEN).unwrap();
    assert_eq!(sa.phase1_state, Phase1State::SentMsg5);
    // The scenario's defining invariant: SKEYID = HMAC-SHA-1(psk, Ni||Nr).
    assert_eq!(sa.skeyid, Some(skeyid));

    // Message 5 (encrypted): IDii, HASH_I.
    let id_ii = phase1::our_ike_id(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 9)));
    let wire5 = phase1::build_msg5(&mut sa, id_ii, None, None).unwrap();

    let decoded5 = IkeMessage::decode(&wire5, &skeyid_e, &phase1_iv8).unwrap();
    assert!(decoded5.header.is_encrypted());

    // Message 6 (encrypted): IDir, HASH_R.
    let id_ir = phase1::our_ike_id(peer);
    let id_ir_b = id_ir.encode_body();
    let sa_i_b = sa.sa_i_b.clone();
    let hash_r = kdf::hash_r(&skeyid, &peer_ke_i, &responder_ke, INITIATOR_COOKIE, RESPONDER_COOKIE, &sa_i_b, &id_ir_b);
    let msg6 = IkeMessage::new(
        IsakmpHeader {
            initiator_cookie: INITIATOR_COOKIE,
            responder_cookie: RESPONDER_COOKIE,
            next_payload: 0,
            exchange_type: ExchangeType::Main,
            flags: 0,
            message_id: 0,
        },
        vec![Payload::Id(id_ir), Payload::Hash(hash_r.to_vec())],
    );
    let wire6 = msg6.encode_encrypted(&skeyid_e, &phase1_iv8).unwrap();

    phase1::handle_msg6(&mut sa, &wire6, None).unwrap();
    assert_eq!(sa.phase1_state, Phase1State::Established);
    assert!(sa.established);

    // Quick Mode: one ESP SA in each direction.
    sa.our_spi = 0xAAAA_AAAA;
    let transform_id = Phase2TransformId::EspDes as u8;
    let wire_q1 = phase2::build_msg1(&mut sa, transform_id, 3600, None).unwrap();
    assert_eq!(sa.phase2_state, Phase2State::Sending);

    let message_id = message_id_of(&wire_q1).unwrap();
    let iv_q: [u8; 8] = kdf::phase2_iv(&phase1_iv, message_id, 8)[..8].try_into().unwrap();
    let decoded_q1 = IkeMessage::decode(&wire_q1, &skeyid_e, &iv_q).unwrap();
    let ni_q = match &decoded_q1.payloads[2] {
        Payload::Nonce(bytes) => bytes.clone(),
        _ => panic!("Quick Mode message 1 must carry Ni'"),
    };

    let responder_spi = 0xBBBB_BBBBu32;
    let nr_q: Vec<u8> = vec![0x24; 20];
    let responder_sa = SaPayload {
        doi: wire::DOI_IPSEC,
        situation: wire::SITUATION_IDENTITY_ONLY,
        proposals: vec![Proposal {
            number: 1,
            protocol_id: wire::ProtocolId::IpsecEsp as u8,
            spi: responder_spi.to_be_bytes().to_vec(),
            transforms: vec![Transform::phase2(1, transform_id, 3600)],
        }],
    };
    let digest2 = kdf::hash2(&skeyid_a, message_id, &responder_sa.encode_body(), &ni_q, &nr_q, &[], &[]);
    let msg_q2 = IkeMessage::new(
        IsakmpHeader {
            initiator_cookie: INITIATOR_COOKIE,
            responder_cookie: RESPONDER_COOKIE,
            next_payload: 0,
            exchange_type: ExchangeType::Quick,
            flags: wire::header_flag::ENCRYPTED,
            message_id,
        },
        vec![Payload::Hash(digest2.to_vec()), Payload::Sa(responder_sa), Payload::Nonce(nr_q)],
    );
    let wire_q2 = msg_q2.encode_encrypted(&skeyid_e, &iv_q).unwrap();

    let proposal = phase2::handle_msg2(&mut sa, &wire_q2).unwrap();
    assert_eq!(proposal.spi, responder_spi.to_be_bytes().to_vec());
    assert_eq!(sa.peer_spi, responder_spi);
    assert_eq!(sa.phase2_state, Phase2State::SentMsg3Pending);

    let needed = phase2::keymat_len(transform_id);
    assert_eq!(needed, DES_KEY_LEN + HMAC_SHA1_LEN);
    phase2::build_msg3(&mut sa, needed).unwrap();

    assert_eq!(sa.phase2_state, Phase2State::Established);
    assert!(sa.phase2_started);
    assert_eq!(sa.our_keymat.as_ref().unwrap().len(), needed);
    assert_eq!(sa.peer_keymat.as_ref().unwrap().len(), needed);
}
