//! The engine: owns both NICs, the IKE/IPsec state, and the virtual
//! router behind one mutex, and drives the fixed-point handler loop the
//! host integration calls into from its receive callbacks and its timer
//! expiry callback (spec.md §4.1/§5).

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info, warn};

use vpn_crypto::rsa_sig::{RsaSigner, RsaVerifier};
use vpn_ike::codec::IkeMessage;
use vpn_ike::codec::wire::{self, Phase2TransformId};
use vpn_ike::{informational, phase1, phase2};
use vpn_ike::{AuthMethod, IkeSa, Phase1State, Phase2State};
use vpn_ipsec::esp;
use vpn_ipsec::table::{CipherKind, Direction, IpsecSa, SaTable};
use vpn_packets::{IpProtocol, Ipv4Packet, MacAddr};

use crate::config::{CryptoAlgo, Phase1Mode, RouterMode, V4Config, VpnAuthMethod, VpnConfig};
use crate::error::Result;
use crate::ipv4_stack::{Delivery as V4Delivery, Ipv4Stack};
use crate::nic::{HostNic, NicAdapter, NicKind};
use crate::router::Router;
use crate::timer::Timer;

const IKE_PORT: u16 = 500;
const DUMMY_KEY: [u8; 8] = [0u8; 8];
const DUMMY_IV: [u8; 8] = [0u8; 8];

/// Cadence at which `on_timer_expiry` re-checks the idle/connect-timeout
/// condition, independent of however often the host happens to call it.
const IDLE_CHECK_INTERVAL_MS: u64 = 5_000;

/// The identity-manager collaborator spec.md's host API leans on for
/// credential material the `VpnConfig` schema only names (a PSK string,
/// a certificate/key file name) rather than carries inline.
pub trait CredentialProvider {
    fn psk(&self) -> Option<Vec<u8>>;
    fn rsa_signer(&self) -> Option<&RsaSigner>;
    fn rsa_verifier(&self) -> Option<&RsaVerifier>;
    fn cert_der(&self) -> Option<Vec<u8>>;
}

/// The trivial provider used when `VpnAuthMethod::Password` is
/// configured: the PSK is the configured password's UTF-8 bytes, and
/// no certificate material is ever asked for.
pub struct PasswordCredentials {
    psk: Vec<u8>,
}

impl PasswordCredentials {
    pub fn new(password: &str) -> PasswordCredentials {
        PasswordCredentials { psk: password.as_bytes().to_vec() }
    }
}

impl CredentialProvider for PasswordCredentials {
    fn psk(&self) -> Option<Vec<u8>> {
        Some(self.psk.clone())
    }
    fn rsa_signer(&self) -> Option<&RsaSigner> {
        None
    }
    fn rsa_verifier(&self) -> Option<&RsaVerifier> {
        None
    }
    fn cert_der(&self) -> Option<Vec<u8>> {
        None
    }
}

fn clamp_u16(value: u64) -> u16 {
    value.min(u16::MAX as u64) as u16
}

fn auth_method_of(config: &VpnConfig) -> AuthMethod {
    match config.vpn_auth_method {
        VpnAuthMethod::Password => AuthMethod::PreSharedKey,
        VpnAuthMethod::Cert => AuthMethod::RsaSignature,
    }
}

fn phase1_crypto_value(config: &VpnConfig) -> u16 {
    match config.vpn_phase1_crypto {
        CryptoAlgo::DesCbc => wire::phase1_attr::CRYPTO_DES_CBC,
        CryptoAlgo::TripleDesCbc => wire::phase1_attr::CRYPTO_3DES_CBC,
    }
}

fn phase2_transform_id(algo: CryptoAlgo) -> u8 {
    match algo {
        CryptoAlgo::DesCbc => Phase2TransformId::EspDes as u8,
        CryptoAlgo::TripleDesCbc => Phase2TransformId::Esp3Des as u8,
    }
}

fn cipher_kind_of(transform_id: u8) -> CipherKind {
    if transform_id == Phase2TransformId::Esp3Des as u8 {
        CipherKind::TripleDes
    } else {
        CipherKind::Des
    }
}

/// Builds the physical-side `V4Config` from the guest-facing one: same
/// struct, re-pointed so `Ipv4Stack::new` treats the physical link as
/// its "guest" network (its own address is `host_ip`, DHCP and proxy
/// ARP disabled — this link only ever talks to one peer, the VPN
/// gateway, which we resolve with ordinary unicast ARP).
fn synthesize_host_v4(v4: &V4Config) -> V4Config {
    V4Config {
        bind: v4.bind,
        guest_ip: v4.host_ip,
        guest_mtu: v4.host_mtu,
        guest_virtual_gateway: v4.host_ip,
        dhcp_enabled: false,
        dhcp_pool_start: v4.host_ip,
        dhcp_pool_end: v4.host_ip,
        dhcp_lease_seconds: 0,
        dhcp_dns: Vec::new(),
        dhcp_domain: None,
        host_ip: v4.host_ip,
        host_mtu: v4.host_mtu,
        host_ip_default_gateway: v4.host_ip_default_gateway,
        arp_expires_seconds: v4.arp_expires_seconds,
        arp_dont_update_expires: v4.arp_dont_update_expires,
        adjust_tcp_mss: None,
        use_proxy_arp: false,
    }
}

struct EngineInner {
    config: VpnConfig,
    credentials: Box<dyn CredentialProvider + Send>,
    phys_nic: NicAdapter,
    virt_nic: NicAdapter,
    host_v4: Ipv4Stack,
    router: Router,
    sa_table: SaTable,
    ike: Option<IkeSa>,
    /// Paces the idle/connect-timeout check independent of how often the
    /// host happens to call `on_timer_expiry`.
    timer: Timer,
    pending_cipher_key_len: usize,
    phase2_deadline: Option<Instant>,
    halting: bool,
}

impl EngineInner {
    fn local_ike_addr(&self) -> IpAddr {
        IpAddr::V4(
            self.config
                .v4
                .as_ref()
                .map(|v4| v4.host_ip)
                .unwrap_or(Ipv4Addr::UNSPECIFIED),
        )
    }

    fn send_ike(&mut self, wire_bytes: Vec<u8>) {
        let peer = self.config.vpn_gateway_address;
        let frames = self.host_v4.send_udp(peer, IKE_PORT, IKE_PORT, &wire_bytes);
        for frame in frames {
            self.phys_nic.enqueue(frame);
        }
    }

    /// Starts (or restarts) the Phase-1 exchange, per `client_start` and
    /// per the idle-reconnect path (spec.md §4.7/§8 scenario 6).
    fn start_phase1(&mut self) {
        let peer = IpAddr::V4(self.config.vpn_gateway_address);
        let mut sa = IkeSa::new(peer, IKE_PORT, IKE_PORT, auth_method_of(&self.config), self.config.connect_timeout());
        let crypto = phase1_crypto_value(&self.config);
        let life_seconds = clamp_u16(self.config.vpn_phase1_life_seconds);

        let wire_bytes = match self.config.vpn_phase1_mode {
            Phase1Mode::Main => {
                let msg1 = phase1::build_msg1(&mut sa, crypto, life_seconds);
                Some(msg1.encode())
            }
            Phase1Mode::Aggressive => {
                let id_ii = phase1::our_ike_id(self.local_ike_addr());
                let msg1 = phase1::build_aggressive_msg1(&mut sa, crypto, life_seconds, id_ii);
                Some(msg1.encode())
            }
        };

        self.ike = Some(sa);
        self.phase2_deadline = None;
        info!("starting Phase-1 exchange with {}", self.config.vpn_gateway_address);
        if let Some(bytes) = wire_bytes {
            self.send_ike(bytes);
        }
    }

    fn start_phase2(&mut self) {
        let transform_id = phase2_transform_id(self.config.vpn_phase2_crypto);
        let life_seconds = clamp_u16(self.config.vpn_phase2_life_seconds);
        let sa = match &mut self.ike {
            Some(sa) if sa.phase1_state == Phase1State::Established => sa,
            _ => return,
        };
        sa.our_spi = vpn_crypto::rand::random_u32();
        match phase2::build_msg1(sa, transform_id, life_seconds, None) {
            Ok(wire_bytes) => {
                info!("starting Quick Mode");
                self.send_ike(wire_bytes);
            }
            Err(err) => warn!("failed to build Quick Mode message 1: {}", err),
        }
    }

    /// Installs the pair of `IpsecSa`s a completed Quick Mode exchange
    /// negotiated, deriving `encryption_key`/`hmac_key` from the KEYMAT
    /// blocks `phase2::build_msg3` already produced.
    fn install_ipsec_sas(&mut self, transform_id: u8) {
        let (peer_addr, our_spi, peer_spi, our_keymat, peer_keymat) = match &self.ike {
            Some(sa) => (sa.peer_addr, sa.our_spi, sa.peer_spi, sa.our_keymat.clone(), sa.peer_keymat.clone()),
            None => return,
        };
        let cipher = cipher_kind_of(transform_id);
        let key_len = cipher.key_len();
        let life_seconds = std::time::Duration::from_secs(self.config.vpn_phase2_life_seconds);
        let life_kilobytes = self.config.vpn_phase2_life_kilobytes;

        // This Quick Mode run may be a rekey: whatever outgoing SAs are
        // still live for this peer are about to be superseded, and get
        // an ESP Delete once the replacement below is installed
        // (spec.md §4.8's exhaustion path: "emits Delete and stops
        // using the SA for egress").
        let superseded = self.sa_table.live_outgoing_spis(peer_addr);

        if let Some(keymat) = &our_keymat {
            if keymat.len() >= key_len + vpn_crypto::mac::HMAC_SHA1_LEN {
                let encryption_key = keymat[..key_len].to_vec();
                let hmac_key = keymat[key_len..key_len + vpn_crypto::mac::HMAC_SHA1_LEN].to_vec();
                let ipsec_sa = IpsecSa::new(
                    peer_addr,
                    Direction::Outgoing,
                    our_spi,
                    [0u8; 8],
                    cipher,
                    encryption_key,
                    hmac_key,
                    life_seconds,
                    life_kilobytes,
                );
                self.sa_table.install_outgoing(ipsec_sa);
            }
        }
        if let Some(keymat) = &peer_keymat {
            if keymat.len() >= key_len + vpn_crypto::mac::HMAC_SHA1_LEN {
                let encryption_key = keymat[..key_len].to_vec();
                let hmac_key = keymat[key_len..key_len + vpn_crypto::mac::HMAC_SHA1_LEN].to_vec();
                let ipsec_sa = IpsecSa::new(
                    peer_addr,
                    Direction::Incoming,
                    peer_spi,
                    [0u8; 8],
                    cipher,
                    encryption_key,
                    hmac_key,
                    life_seconds,
                    life_kilobytes,
                );
                self.sa_table.install_incoming(ipsec_sa);
            }
        }
        info!("installed IPsec SA pair (our_spi={:#x}, peer_spi={:#x})", our_spi, peer_spi);
        self.emit_esp_delete(peer_addr, superseded);
    }

    /// Builds and sends one ESP Delete payload listing `spis` (our
    /// outgoing SPIs being torn down), then marks them deleted so
    /// `select_outgoing` stops choosing them. A no-op if `spis` is
    /// empty or there is no established Phase-1 SA to encrypt under.
    fn emit_esp_delete(&mut self, peer: IpAddr, spis: Vec<u32>) {
        if spis.is_empty() {
            return;
        }
        if let Some(mut sa) = self.ike.take() {
            if sa.established {
                let spi_bytes = spis.iter().map(|spi| spi.to_be_bytes().to_vec()).collect();
                match informational::build_delete(&mut sa, wire::ProtocolId::IpsecEsp as u8, 4, spi_bytes) {
                    Ok(wire_bytes) => {
                        self.ike = Some(sa);
                        self.send_ike(wire_bytes);
                    }
                    Err(err) => {
                        warn!("failed to build ESP Delete: {}", err);
                        self.ike = Some(sa);
                    }
                }
            } else {
                self.ike = Some(sa);
            }
        }
        for spi in spis {
            self.sa_table.mark_outgoing_deleted(peer, spi);
        }
    }

    /// Emits Delete for every live child SA and, if established, the
    /// IKE SA itself. Shared by `client_stop` and the idle-reconnect
    /// path (spec.md: both must "emit ISAKMP Delete and ESP Delete for
    /// every live SA" before discarding state).
    fn teardown_current_sas(&mut self) {
        let peer = IpAddr::V4(self.config.vpn_gateway_address);
        let live_spis = self.sa_table.live_outgoing_spis(peer);
        self.emit_esp_delete(peer, live_spis);

        if let Some(mut sa) = self.ike.take() {
            if sa.established {
                let mut isakmp_spi = sa.initiator_cookie.to_be_bytes().to_vec();
                isakmp_spi.extend_from_slice(&sa.responder_cookie.to_be_bytes());
                match informational::build_delete(&mut sa, wire::ProtocolId::Ike as u8, 16, vec![isakmp_spi]) {
                    Ok(wire_bytes) => {
                        self.ike = Some(sa);
                        self.send_ike(wire_bytes);
                    }
                    Err(_) => self.ike = Some(sa),
                }
            } else {
                self.ike = Some(sa);
            }
        }
    }

    /// Advances the Phase-1/Phase-2 state machine by one inbound IKE
    /// datagram (spec.md §4.7's state transition table).
    fn handle_ike_datagram(&mut self, wire_bytes: &[u8]) {
        let mut sa = match self.ike.take() {
            Some(sa) => sa,
            None => return,
        };
        let outcome = self.advance_ike(&mut sa, wire_bytes);
        if let Err(err) = outcome {
            warn!("IKE exchange failed: {}", err);
        }
        self.ike = Some(sa);
    }

    fn advance_ike(&mut self, sa: &mut IkeSa, wire_bytes: &[u8]) -> Result<()> {
        match sa.phase1_state {
            Phase1State::SentMsg1 => {
                let msg2 = IkeMessage::decode(wire_bytes, &DUMMY_KEY, &DUMMY_IV)?;
                let crypto = phase1::handle_msg2(sa, &msg2)?;
                self.pending_cipher_key_len = phase1::cipher_key_len(crypto);
                let msg3 = phase1::build_msg3(sa);
                self.send_ike(msg3.encode());
            }
            Phase1State::SentMsg3 => {
                let msg4 = IkeMessage::decode(wire_bytes, &DUMMY_KEY, &DUMMY_IV)?;
                let psk = self.credentials.psk();
                phase1::handle_msg4(sa, &msg4, psk.as_deref(), self.pending_cipher_key_len)?;
                let id_ii = phase1::our_ike_id(self.local_ike_addr());
                let cert = self.credentials.cert_der();
                let signer = self.credentials.rsa_signer();
                let msg5 = phase1::build_msg5(sa, id_ii, cert, signer)?;
                self.send_ike(msg5);
            }
            Phase1State::SentAggressiveMsg1 => {
                let msg2 = IkeMessage::decode(wire_bytes, &DUMMY_KEY, &DUMMY_IV)?;
                let crypto = phase1_crypto_value(&self.config);
                let cipher_len = phase1::cipher_key_len(crypto);
                let psk = self.credentials.psk();
                phase1::handle_aggressive_msg2(sa, &msg2, psk.as_deref(), cipher_len)?;
                let wire = phase1::build_aggressive_msg3(sa, self.config.vpn_phase1_aggressive_cleartext_hash)?;
                self.send_ike(wire);
                self.phase2_deadline = Some(Instant::now() + self.config.phase2_blank_span());
                sa.touch(wire_bytes.len() as u64);
            }
            Phase1State::SentMsg5 => {
                let verifier = self.credentials.rsa_verifier();
                phase1::handle_msg6(sa, wire_bytes, verifier)?;
                self.phase2_deadline = Some(Instant::now() + self.config.phase2_blank_span());
            }
            Phase1State::Established => self.handle_established(sa, wire_bytes)?,
            Phase1State::Dead => {}
        }
        Ok(())
    }

    fn handle_established(&mut self, sa: &mut IkeSa, wire_bytes: &[u8]) -> Result<()> {
        if sa.phase2_state == Phase2State::Sending {
            if let Ok(proposal) = phase2::handle_msg2(sa, wire_bytes) {
                let transform_id = proposal
                    .transforms
                    .first()
                    .map(|t| t.transform_id)
                    .unwrap_or(wire::Phase2TransformId::EspDes as u8);
                let needed = phase2::keymat_len(transform_id);
                let msg3 = phase2::build_msg3(sa, needed)?;
                self.send_ike(msg3);
                self.install_ipsec_sas(transform_id);
                return Ok(());
            }
        }
        let payloads = informational::decode(sa, wire_bytes)?;
        self.handle_informational(sa, payloads);
        Ok(())
    }

    fn handle_informational(&mut self, sa: &mut IkeSa, payloads: Vec<vpn_ike::Payload>) {
        for payload in payloads {
            match payload {
                vpn_ike::Payload::Delete(delete) => {
                    info!("peer sent Delete for protocol {}", delete.protocol_id);
                    if delete.protocol_id == wire::ProtocolId::Ike as u8 {
                        sa.mark_dead();
                    } else {
                        for spi_bytes in &delete.spis {
                            if let Ok(spi) = <[u8; 4]>::try_from(spi_bytes.as_slice()) {
                                self.sa_table.mark_outgoing_deleted(sa.peer_addr, u32::from_be_bytes(spi));
                            }
                        }
                    }
                }
                vpn_ike::Payload::Notify(notify) => {
                    debug!("peer Notify message_type={}", notify.message_type);
                }
                _ => {}
            }
        }
    }

    /// Encapsulates a guest-bound-for-tunnel IPv4 datagram under the
    /// current outgoing IPsec SA and queues it on the physical NIC.
    fn encapsulate_and_send(&mut self, inner_datagram: Vec<u8>) {
        let peer = IpAddr::V4(self.config.vpn_gateway_address);
        let sa = match self.sa_table.select_outgoing(peer) {
            Some(sa) => sa,
            None => {
                debug!("dropping tunnel-bound datagram: no outgoing IPsec SA yet");
                return;
            }
        };
        match esp::encapsulate(sa, &inner_datagram, IpProtocol::IP_in_IP as u8) {
            Ok(wire_bytes) => {
                let frames = self.host_v4.send_ip(peer_ipv4(&self.config), IpProtocol::ESP, 64, &wire_bytes);
                for frame in frames {
                    self.phys_nic.enqueue(frame);
                }
            }
            Err(err) => warn!("ESP encapsulation failed: {}", err),
        }
    }

    fn encapsulate_and_send_v6(&mut self, inner_datagram: Vec<u8>) {
        let peer = IpAddr::V4(self.config.vpn_gateway_address);
        let sa = match self.sa_table.select_outgoing(peer) {
            Some(sa) => sa,
            None => {
                debug!("dropping tunnel-bound IPv6 datagram: no outgoing IPsec SA yet");
                return;
            }
        };
        match esp::encapsulate(sa, &inner_datagram, IpProtocol::IPv6 as u8) {
            Ok(wire_bytes) => {
                let frames = self.host_v4.send_ip(peer_ipv4(&self.config), IpProtocol::ESP, 64, &wire_bytes);
                for frame in frames {
                    self.phys_nic.enqueue(frame);
                }
            }
            Err(err) => warn!("ESP encapsulation failed: {}", err),
        }
    }

    /// Processes one inbound ESP datagram from the physical link.
    fn decapsulate_and_deliver(&mut self, packet: Ipv4Packet) {
        let peer = IpAddr::V4(packet.src_addr());
        let esp_payload = packet.payload().to_vec();
        let spi = match esp_payload.get(0..4) {
            Some(bytes) => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            None => return,
        };
        let sa = match self.sa_table.lookup_incoming(peer, spi) {
            Some(sa) => sa,
            None => {
                warn!("dropping ESP datagram: no incoming SA for SPI {:#x}", spi);
                return;
            }
        };
        match esp::decapsulate(sa, esp_payload) {
            Ok((inner, protocol)) if protocol == IpProtocol::IP_in_IP as u8 => {
                sa.bytes_transferred += inner.len() as u64;
                let frames = self.router.deliver_to_guest_v4(inner);
                for frame in frames {
                    self.virt_nic.enqueue(frame);
                }
            }
            Ok((inner, protocol)) if protocol == IpProtocol::IPv6 as u8 => {
                sa.bytes_transferred += inner.len() as u64;
                let frames = self.router.deliver_to_guest_v6(inner);
                for frame in frames {
                    self.virt_nic.enqueue(frame);
                }
            }
            Ok(_) => warn!("dropping decapsulated datagram of unsupported inner protocol"),
            Err(err) => warn!("ESP decapsulation failed: {}", err),
        }
    }

    /// One pass over both NICs' receive queues. Returns whether any
    /// work was done, so the caller can iterate to a fixed point.
    fn process_once(&mut self) -> bool {
        let mut changed = false;

        for frame in self.phys_nic.drain_filtered() {
            changed = true;
            let (delivery, replies) = self.host_v4.receive_ether(frame);
            for reply in replies {
                self.phys_nic.enqueue(reply);
            }
            match delivery {
                Some(V4Delivery::Udp(segment)) if segment.dest_port() == IKE_PORT => {
                    self.handle_ike_datagram(segment.payload());
                }
                Some(V4Delivery::RawIp(packet)) if packet.protocol() == IpProtocol::ESP => {
                    self.decapsulate_and_deliver(packet);
                }
                _ => {}
            }
        }

        for frame in self.virt_nic.drain_filtered() {
            changed = true;
            let received = self.router.receive_from_guest(frame);
            for reply in received.to_guest {
                self.virt_nic.enqueue(reply);
            }
            if let Some(datagram) = received.tunnel_v4 {
                match self.router.mode() {
                    RouterMode::L3IPsec => self.encapsulate_and_send(datagram),
                    RouterMode::L3Trans => self.nat_and_send(datagram),
                    RouterMode::L2Trans => {}
                }
            }
            if let Some(datagram) = received.tunnel_v6 {
                if self.router.mode() == RouterMode::L3IPsec {
                    self.encapsulate_and_send_v6(datagram);
                }
            }
        }

        if let Some(deadline) = self.phase2_deadline {
            if Instant::now() >= deadline {
                self.phase2_deadline = None;
                self.start_phase2();
                changed = true;
            }
        }

        if self.router.mode() == RouterMode::L3IPsec {
            let peer = IpAddr::V4(self.config.vpn_gateway_address);
            if self.sa_table.outgoing_needing_rekey(peer).is_some() && self.ike.as_ref().map(|sa| sa.phase2_state != Phase2State::Sending).unwrap_or(false) {
                changed = true;
                self.start_phase2();
            }
            self.sa_table.sweep_expired_outgoing();
        }

        if let Some(datagram) = self.router.due_keepalive() {
            changed = true;
            if self.router.mode() == RouterMode::L3IPsec {
                self.encapsulate_and_send(datagram);
            }
        }

        if self.host_v4.changed {
            self.host_v4.changed = false;
            changed = true;
        }

        changed
    }

    /// `L3Trans` egress: source-NATs the guest datagram onto the
    /// physical link without IPsec (spec.md's non-VPN router mode).
    fn nat_and_send(&mut self, datagram: Vec<u8>) {
        let mut packet = match Ipv4Packet::new(datagram, 0) {
            Ok(p) => p,
            Err(_) => return,
        };
        let host_ip = match self.config.v4.as_ref() {
            Some(v4) => v4.host_ip,
            None => return,
        };
        packet.set_src_addr(host_ip);
        packet.set_checksum();
        let frames = self.host_v4.send_raw_ip(packet);
        for frame in frames {
            self.phys_nic.enqueue(frame);
        }
    }

    fn process_idle(&mut self) {
        let idle_timeout = self.config.idle_timeout();
        let reconnect = match &self.ike {
            Some(sa) if sa.established && sa.is_idle_timed_out(idle_timeout) => true,
            Some(sa) if sa.is_connect_timed_out() && sa.phase1_state != Phase1State::Established => true,
            None => true,
            _ => false,
        };
        if reconnect && !self.halting {
            warn!("IKE SA idle or connect-timed-out, reconnecting");
            self.teardown_current_sas();
            self.sa_table = SaTable::new();
            self.start_phase1();
        }
    }
}

fn peer_ipv4(config: &VpnConfig) -> Ipv4Addr {
    config.vpn_gateway_address
}

/// The top-level engine handle. Cheap to clone (an `Arc` around the
/// mutex would be the host's job); this type itself just owns the lock.
pub struct Engine {
    inner: Mutex<EngineInner>,
}

impl Engine {
    /// `init`: allocates the engine for `config` against the physical
    /// NIC's MAC/MTU, or returns `None` if the schema is internally
    /// inconsistent (spec.md §6's only externally observable
    /// `client_start` failure mode, surfaced here at construction since
    /// that is this crate's natural point to validate it).
    pub fn init(
        config: VpnConfig,
        phys_mac: MacAddr,
        phys_mtu: u16,
        credentials: Box<dyn CredentialProvider + Send>,
    ) -> Option<Engine> {
        if !config.is_valid() {
            return None;
        }
        let host_v4 = match &config.v4 {
            Some(v4) => Ipv4Stack::new(phys_mac, &synthesize_host_v4(v4)),
            None => return None,
        };
        let router = Router::new(&config, MacAddr::new(config.virtual_gateway_mac));
        let inner = EngineInner {
            phys_nic: NicAdapter::new(NicKind::Physical, phys_mac, phys_mtu, false),
            virt_nic: NicAdapter::new(NicKind::Virtual, MacAddr::new(config.virtual_gateway_mac), config.v4.as_ref().map(|v4| v4.guest_mtu).unwrap_or(1500), false),
            host_v4,
            router,
            sa_table: SaTable::new(),
            ike: None,
            timer: Timer::new(),
            pending_cipher_key_len: 8,
            phase2_deadline: None,
            halting: false,
            config,
            credentials,
        };
        Some(Engine { inner: Mutex::new(inner) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("engine mutex poisoned by a prior panic, recovering state as-is");
                poisoned.into_inner()
            }
        }
    }

    /// `client_start`: begins the Phase-1 exchange. Mirrors spec.md's
    /// host API exactly; failure is only ever the `init`-time `None`.
    pub fn client_start(&self) {
        let mut inner = self.lock();
        inner.halting = false;
        inner.start_phase1();
    }

    /// `client_stop`: sets the halting flag and emits Delete for every
    /// live SA. The flag is observed at the next `run_handler` entry.
    pub fn client_stop(&self) {
        let mut inner = self.lock();
        inner.halting = true;
        inner.teardown_current_sas();
    }

    /// Delivers one Ethernet frame received on the physical NIC.
    pub fn on_receive_physical(&self, frame: Vec<u8>) {
        self.lock().phys_nic.on_receive(frame);
    }

    /// Delivers one Ethernet frame received on the virtual (guest-facing) NIC.
    pub fn on_receive_virtual(&self, frame: Vec<u8>) {
        self.lock().virt_nic.on_receive(frame);
    }

    /// Runs the fixed-point convergence loop (spec.md §4.1): processes
    /// both NICs' receive queues, the keepalive/rekey/phase2-start
    /// timers, and the idle-reconnect check, repeating until a pass
    /// makes no further progress, then flushes both NICs to the host.
    pub fn run_handler(&self, phys_host: &mut dyn HostNic, virt_host: &mut dyn HostNic) {
        let mut inner = self.lock();
        if inner.halting {
            inner.phys_nic.flush(phys_host);
            inner.virt_nic.flush(virt_host);
            return;
        }
        loop {
            if !inner.process_once() {
                break;
            }
        }
        inner.phys_nic.flush(phys_host);
        inner.virt_nic.flush(virt_host);
    }

    /// Called from the host's timer-expiry callback (spec.md §4.2):
    /// drains due deadlines, runs per-protocol `on_tick` housekeeping,
    /// and checks the idle-reconnect condition at `IDLE_CHECK_INTERVAL_MS`
    /// cadence. Returns the next deadline the host's one-shot timer
    /// should be rearmed for.
    pub fn on_timer_expiry(&self, now_ms: u64, phys_host: &mut dyn HostNic, virt_host: &mut dyn HostNic) -> u64 {
        let next_deadline;
        {
            let mut inner = self.lock();
            let fired = inner.timer.expire(now_ms);
            let frames = inner.router.on_tick();
            for frame in frames {
                inner.virt_nic.enqueue(frame);
            }
            let host_frames = inner.host_v4.on_tick();
            for frame in host_frames {
                inner.phys_nic.enqueue(frame);
            }
            if fired > 0 || inner.timer.is_empty() {
                inner.process_idle();
            }
            next_deadline = inner.timer.set(now_ms, IDLE_CHECK_INTERVAL_MS);
        }
        self.run_handler(phys_host, virt_host);
        next_deadline
    }

    /// `free`: releases the engine. A plain drop suffices in safe Rust;
    /// this exists so callers mirroring spec.md's host API have an
    /// explicit symmetric call rather than relying on scope exit.
    pub fn free(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> VpnConfig {
        VpnConfig {
            mode: RouterMode::L3IPsec,
            virtual_gateway_mac: [0x02, 0, 0, 0, 0, 1],
            v4: Some(V4Config {
                bind: Ipv4Addr::new(0, 0, 0, 0),
                guest_ip: Ipv4Addr::new(10, 0, 0, 2),
                guest_mtu: 1500,
                guest_virtual_gateway: Ipv4Addr::new(10, 0, 0, 1),
                dhcp_enabled: true,
                dhcp_pool_start: Ipv4Addr::new(10, 0, 0, 2),
                dhcp_pool_end: Ipv4Addr::new(10, 0, 0, 200),
                dhcp_lease_seconds: 3600,
                dhcp_dns: vec![Ipv4Addr::new(8, 8, 8, 8)],
                dhcp_domain: None,
                host_ip: Ipv4Addr::new(192, 168, 1, 50),
                host_mtu: 1500,
                host_ip_default_gateway: Ipv4Addr::new(192, 168, 1, 1),
                arp_expires_seconds: 60,
                arp_dont_update_expires: false,
                adjust_tcp_mss: None,
                use_proxy_arp: true,
            }),
            v6: None,
            vpn_gateway_address: Ipv4Addr::new(203, 0, 113, 1),
            vpn_auth_method: VpnAuthMethod::Password,
            vpn_password: Some("secret".into()),
            vpn_id_string: "client".into(),
            vpn_cert_name: None,
            vpn_ca_cert_name: None,
            vpn_rsa_key_name: None,
            vpn_specify_issuer: false,
            vpn_phase1_mode: Phase1Mode::Main,
            vpn_phase1_crypto: CryptoAlgo::DesCbc,
            vpn_phase2_crypto: CryptoAlgo::DesCbc,
            vpn_phase1_life_seconds: 28800,
            vpn_phase1_life_kilobytes: 0,
            vpn_phase2_life_seconds: 3600,
            vpn_phase2_life_kilobytes: 500_000,
            vpn_wait_phase2_blank_span_ms: 500,
            vpn_connect_timeout_ms: 30_000,
            vpn_idle_timeout_seconds: 300,
            vpn_ping_target: None,
            vpn_ping_interval_seconds: 30,
            vpn_ping_msg_size: 32,
            vpn_phase1_aggressive_cleartext_hash: false,
        }
    }

    struct NullHost {
        mac: MacAddr,
        mtu: u16,
        sent: Vec<Vec<u8>>,
    }

    impl HostNic for NullHost {
        fn mac_address(&self) -> MacAddr {
            self.mac
        }
        fn mtu(&self) -> u16 {
            self.mtu
        }
        fn send(&mut self, frames: Vec<Vec<u8>>) {
            self.sent.extend(frames);
        }
    }

    #[test]
    fn init_rejects_invalid_config() {
        let mut config = sample_config();
        config.vpn_password = None;
        let credentials = Box::new(PasswordCredentials::new(""));
        assert!(Engine::init(config, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, credentials).is_none());
    }

    #[test]
    fn on_timer_expiry_reports_next_idle_check_deadline() {
        let config = sample_config();
        let credentials = Box::new(PasswordCredentials::new("secret"));
        let engine = Engine::init(config, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, credentials).unwrap();

        let mut phys = NullHost { mac: MacAddr::new([1, 0, 0, 0, 0, 1]), mtu: 1500, sent: Vec::new() };
        let mut virt = NullHost { mac: MacAddr::new([2, 0, 0, 0, 0, 1]), mtu: 1500, sent: Vec::new() };
        let deadline = engine.on_timer_expiry(0, &mut phys, &mut virt);
        assert_eq!(deadline, IDLE_CHECK_INTERVAL_MS);

        // The first call has no established SA yet, so it reconnects.
        assert_eq!(phys.sent.len(), 1);

        phys.sent.clear();
        let next = engine.on_timer_expiry(IDLE_CHECK_INTERVAL_MS, &mut phys, &mut virt);
        assert_eq!(next, 2 * IDLE_CHECK_INTERVAL_MS);
    }

    #[test]
    fn client_stop_emits_esp_delete_and_marks_the_outgoing_sa_deleted() {
        let config = sample_config();
        let credentials = Box::new(PasswordCredentials::new("secret"));
        let engine = Engine::init(config, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, credentials).unwrap();
        let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));

        {
            let mut inner = engine.lock();
            let mut sa = IkeSa::new(peer, 500, 500, AuthMethod::PreSharedKey, std::time::Duration::from_secs(30));
            sa.established = true;
            sa.phase1_iv = Some(vec![1u8; 8]);
            sa.skeyid_e = Some(vec![2u8; 8]);
            inner.ike = Some(sa);

            let ipsec_sa = IpsecSa::new(
                peer,
                Direction::Outgoing,
                0xAAAA_AAAA,
                [0u8; 8],
                CipherKind::Des,
                vec![1u8; 8],
                vec![2u8; 20],
                std::time::Duration::from_secs(3600),
                1_000_000,
            );
            inner.sa_table.install_outgoing(ipsec_sa);
        }

        engine.client_stop();

        let mut phys = NullHost { mac: MacAddr::new([1, 0, 0, 0, 0, 1]), mtu: 1500, sent: Vec::new() };
        let mut virt = NullHost { mac: MacAddr::new([2, 0, 0, 0, 0, 1]), mtu: 1500, sent: Vec::new() };
        engine.run_handler(&mut phys, &mut virt);

        // One frame for the ESP Delete, one for the ISAKMP Delete.
        assert_eq!(phys.sent.len(), 2);
        assert!(engine.lock().sa_table.live_outgoing_spis(peer).is_empty());
    }

    #[test]
    fn client_start_sends_phase1_message1() {
        let config = sample_config();
        let credentials = Box::new(PasswordCredentials::new("secret"));
        let engine = Engine::init(config, MacAddr::new([1, 0, 0, 0, 0, 1]), 1500, credentials).unwrap();
        engine.client_start();

        let mut phys = NullHost { mac: MacAddr::new([1, 0, 0, 0, 0, 1]), mtu: 1500, sent: Vec::new() };
        let mut virt = NullHost { mac: MacAddr::new([2, 0, 0, 0, 0, 1]), mtu: 1500, sent: Vec::new() };
        engine.run_handler(&mut phys, &mut virt);

        assert_eq!(phys.sent.len(), 1);
        assert!(virt.sent.is_empty());
    }
}
