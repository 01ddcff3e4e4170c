//! Informational exchanges: Notify (status/error signaling) and Delete
//! (peer-initiated SA teardown), both delivered encrypted under the
//! Phase-1 key with a fresh Message-ID and Phase-2-style IV.

use crate::codec::payload::{DeletePayload, NotifyPayload, Payload};
use crate::codec::wire::{self, ExchangeType};
use crate::codec::{IkeMessage, IsakmpHeader};
use crate::error::Result;
use crate::sa::IkeSa;

fn header(sa: &IkeSa, message_id: u32) -> IsakmpHeader {
    IsakmpHeader {
        initiator_cookie: sa.initiator_cookie,
        responder_cookie: sa.responder_cookie,
        next_payload: 0,
        exchange_type: ExchangeType::Informational,
        flags: wire::header_flag::ENCRYPTED,
        message_id,
    }
}

/// Builds an encrypted Delete message carrying the SPIs of the
/// protocol (ISAKMP or ESP) being torn down.
pub fn build_delete(sa: &mut IkeSa, protocol_id: u8, spi_size: u8, spis: Vec<Vec<u8>>) -> Result<Vec<u8>> {
    let message_id = vpn_crypto::rand::random_u32();
    let payload = Payload::Delete(DeletePayload {
        doi: wire::DOI_IPSEC,
        protocol_id,
        spi_size,
        spis,
    });
    let message = IkeMessage::new(header(sa, message_id), vec![payload]);
    let iv = sa.advance_phase2_iv(message_id);
    message.encode_encrypted(sa.skeyid_e.as_ref().unwrap(), &iv).map_err(Into::into)
}

/// Builds an encrypted Notify message (e.g. `INVALID-COOKIE`,
/// `DPD`-style liveness probes aren't modeled — see spec.md's
/// idle-timeout-based detection instead).
pub fn build_notify(sa: &mut IkeSa, protocol_id: u8, spi: Vec<u8>, message_type: u16, data: Vec<u8>) -> Result<Vec<u8>> {
    let message_id = vpn_crypto::rand::random_u32();
    let payload = Payload::Notify(NotifyPayload {
        doi: wire::DOI_IPSEC,
        protocol_id,
        spi,
        message_type,
        data,
    });
    let message = IkeMessage::new(header(sa, message_id), vec![payload]);
    let iv = sa.advance_phase2_iv(message_id);
    message.encode_encrypted(sa.skeyid_e.as_ref().unwrap(), &iv).map_err(Into::into)
}

/// Decodes an Informational message addressed to this SA and returns
/// its payloads for the caller to act on (mark SAs dead on Delete,
/// log on Notify).
pub fn decode(sa: &mut IkeSa, wire_bytes: &[u8]) -> Result<Vec<Payload>> {
    let message_id = crate::codec::message_id_of(wire_bytes)?;
    let iv = sa.advance_phase2_iv(message_id);
    let message = IkeMessage::decode(wire_bytes, sa.skeyid_e.as_ref().unwrap(), &iv)?;
    sa.touch(wire_bytes.len() as u64);
    Ok(message.payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sa::AuthMethod;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn established_sa() -> IkeSa {
        let mut sa = IkeSa::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 500, 500, AuthMethod::PreSharedKey, Duration::from_secs(30));
        sa.phase1_iv = Some(vec![1u8; 8]);
        sa.skeyid_e = Some(vec![2u8; 8]);
        sa
    }

    #[test]
    fn delete_payload_roundtrips_through_encryption() {
        let mut sa = established_sa();
        let wire_bytes = build_delete(&mut sa, wire::ProtocolId::IpsecEsp as u8, 4, vec![vec![1, 2, 3, 4]]).unwrap();

        let mut receiver = established_sa();
        let payloads = decode(&mut receiver, &wire_bytes).unwrap();
        assert_eq!(
            payloads,
            vec![Payload::Delete(DeletePayload {
                doi: wire::DOI_IPSEC,
                protocol_id: wire::ProtocolId::IpsecEsp as u8,
                spi_size: 4,
                spis: vec![vec![1, 2, 3, 4]],
            })]
        );
    }
}
