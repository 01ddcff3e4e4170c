use std::convert::TryInto;
use std::net::Ipv4Addr;

pub const DHCP_OP_BOOTREQUEST: u8 = 1;
pub const DHCP_OP_BOOTREPLY: u8 = 2;
pub const DHCP_HTYPE_ETHERNET: u8 = 1;

pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DOMAIN_NAME_SERVER: u8 = 6;
pub const OPT_HOST_NAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_INTERFACE_MTU: u8 = 26;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_IDENTIFIER: u8 = 54;
pub const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
pub const OPT_END: u8 = 255;
pub const OPT_PAD: u8 = 0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<DhcpMessageType> {
        use DhcpMessageType::*;
        match value {
            1 => Some(Discover),
            2 => Some(Offer),
            3 => Some(Request),
            4 => Some(Decline),
            5 => Some(Ack),
            6 => Some(Nak),
            7 => Some(Release),
            8 => Some(Inform),
            _ => None,
        }
    }
}

const FIXED_HEADER_LEN: usize = 236;

/// A BOOTP/DHCP message (RFC 2131): the 236-byte fixed header, a 4-byte
/// magic cookie, and a TLV option list.
#[derive(Clone, Debug)]
pub struct DhcpMessage {
    pub data: Vec<u8>,
}

impl DhcpMessage {
    pub fn new(data: Vec<u8>) -> Result<DhcpMessage, &'static str> {
        if data.len() < FIXED_HEADER_LEN + 4 {
            return Err("Message too short to be DHCP");
        }
        if data[FIXED_HEADER_LEN..FIXED_HEADER_LEN + 4] != DHCP_MAGIC_COOKIE {
            return Err("Missing DHCP magic cookie");
        }
        Ok(DhcpMessage { data })
    }

    /// A fresh DHCPREPLY-shaped message (server -> client), fixed header
    /// zeroed except op/htype/hlen/xid/yiaddr/chaddr/message-type.
    pub fn build_reply(
        xid: u32,
        yiaddr: Ipv4Addr,
        siaddr: Ipv4Addr,
        chaddr: crate::MacAddr,
        message_type: DhcpMessageType,
    ) -> DhcpMessage {
        let mut data = vec![0u8; FIXED_HEADER_LEN];
        data[0] = DHCP_OP_BOOTREPLY;
        data[1] = DHCP_HTYPE_ETHERNET;
        data[2] = 6; // hlen
        data[4..8].copy_from_slice(&xid.to_be_bytes());
        data[16..20].copy_from_slice(&yiaddr.octets());
        data[20..24].copy_from_slice(&siaddr.octets());
        data[28..34].copy_from_slice(&chaddr.bytes);
        data.extend_from_slice(&DHCP_MAGIC_COOKIE);
        let mut message = DhcpMessage { data };
        message.set_option(OPT_MESSAGE_TYPE, &[message_type as u8]);
        message
    }

    pub fn op(&self) -> u8 {
        self.data[0]
    }

    pub fn htype(&self) -> u8 {
        self.data[1]
    }

    pub fn hlen(&self) -> u8 {
        self.data[2]
    }

    pub fn xid(&self) -> u32 {
        u32::from_be_bytes(self.data[4..8].try_into().unwrap())
    }

    pub fn set_xid(&mut self, xid: u32) {
        self.data[4..8].copy_from_slice(&xid.to_be_bytes());
    }

    pub fn flags(&self) -> u16 {
        u16::from_be_bytes(self.data[10..12].try_into().unwrap())
    }

    pub fn broadcast_requested(&self) -> bool {
        self.flags() & 0x8000 != 0
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        let b: [u8; 4] = self.data[12..16].try_into().unwrap();
        Ipv4Addr::from(b)
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        let b: [u8; 4] = self.data[16..20].try_into().unwrap();
        Ipv4Addr::from(b)
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        let b: [u8; 4] = self.data[20..24].try_into().unwrap();
        Ipv4Addr::from(b)
    }

    pub fn giaddr(&self) -> Ipv4Addr {
        let b: [u8; 4] = self.data[24..28].try_into().unwrap();
        Ipv4Addr::from(b)
    }

    pub fn chaddr(&self) -> crate::MacAddr {
        crate::MacAddr::from_slice(&self.data[28..28 + self.hlen() as usize]).unwrap_or(crate::MacAddr::ZERO)
    }

    /// Iterates `(code, value)` pairs from the option list, stopping at
    /// the End option or end of buffer. Pad bytes are skipped.
    pub fn options(&self) -> Vec<(u8, &[u8])> {
        let mut result = Vec::new();
        let mut offset = FIXED_HEADER_LEN + 4;
        while offset < self.data.len() {
            let code = self.data[offset];
            if code == OPT_END {
                break;
            }
            if code == OPT_PAD {
                offset += 1;
                continue;
            }
            if offset + 1 >= self.data.len() {
                break;
            }
            let len = self.data[offset + 1] as usize;
            if offset + 2 + len > self.data.len() {
                break;
            }
            result.push((code, &self.data[offset + 2..offset + 2 + len]));
            offset += 2 + len;
        }
        result
    }

    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options().into_iter().find(|(c, _)| *c == code).map(|(_, v)| v)
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.option(OPT_MESSAGE_TYPE)
            .and_then(|v| v.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.option(OPT_REQUESTED_IP).and_then(|v| {
            let b: [u8; 4] = v.try_into().ok()?;
            Some(Ipv4Addr::from(b))
        })
    }

    pub fn parameter_request_list(&self) -> Vec<u8> {
        self.option(OPT_PARAMETER_REQUEST_LIST)
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    /// Appends (or, for `OPT_MESSAGE_TYPE` set by `build_reply`, replaces)
    /// an option, keeping the End marker last.
    pub fn set_option(&mut self, code: u8, value: &[u8]) {
        if let Some(end_pos) = self.data.iter().position(|&b| b == OPT_END) {
            self.data.truncate(end_pos);
        }
        self.data.push(code);
        self.data.push(value.len() as u8);
        self.data.extend_from_slice(value);
        self.data.push(OPT_END);
    }

    pub fn set_ipv4_option(&mut self, code: u8, addr: Ipv4Addr) {
        self.set_option(code, &addr.octets());
    }

    pub fn set_u32_option(&mut self, code: u8, value: u32) {
        self.set_option(code, &value.to_be_bytes());
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MacAddr;

    #[test]
    fn build_offer_roundtrip() {
        let mac = MacAddr::new([1, 2, 3, 4, 5, 6]);
        let mut msg = DhcpMessage::build_reply(
            0xdeadbeef,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 1),
            mac,
            DhcpMessageType::Offer,
        );
        msg.set_ipv4_option(OPT_SUBNET_MASK, Ipv4Addr::new(255, 255, 255, 0));
        msg.set_ipv4_option(OPT_ROUTER, Ipv4Addr::new(10, 0, 0, 1));
        msg.set_u32_option(OPT_LEASE_TIME, 3600);

        let parsed = DhcpMessage::new(msg.into_data()).unwrap();
        assert_eq!(parsed.op(), DHCP_OP_BOOTREPLY);
        assert_eq!(parsed.xid(), 0xdeadbeef);
        assert_eq!(parsed.yiaddr(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(parsed.chaddr(), mac);
        assert_eq!(parsed.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(
            parsed.option(OPT_SUBNET_MASK),
            Some(&[255, 255, 255, 0][..])
        );
    }

    #[test]
    fn discover_parses_parameter_request_list() {
        let mut data = vec![0u8; FIXED_HEADER_LEN];
        data[0] = DHCP_OP_BOOTREQUEST;
        data.extend_from_slice(&DHCP_MAGIC_COOKIE);
        data.extend_from_slice(&[OPT_MESSAGE_TYPE, 1, 1]);
        data.extend_from_slice(&[OPT_PARAMETER_REQUEST_LIST, 3, 1, 3, 6]);
        data.push(OPT_END);

        let msg = DhcpMessage::new(data).unwrap();
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Discover));
        assert_eq!(msg.parameter_request_list(), vec![1, 3, 6]);
    }
}
