//! The `IkeSa` aggregate: everything a Phase-1/Phase-2 exchange
//! accumulates about one peer association, plus the state enums that
//! drive `vpn_runtime::engine`'s dispatch into `phase1`/`phase2`.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use vpn_crypto::dh::DiffieHellman;

/// Which side of the exchange this engine is playing. The engine only
/// ever initiates (spec.md's client-side scope), but the state machine
/// still distinguishes the two message orderings used to compute
/// `HASH_I`/`HASH_R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase1Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase1State {
    Idle,
    SentMsg1,
    SentMsg3,
    SentMsg5,
    SentAggressiveMsg1,
    Established,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase2State {
    NotStarted,
    Sending,
    SentMsg3Pending,
    Established,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    PreSharedKey,
    RsaSignature,
}

/// Fields named directly after spec.md's IKE SA field list, with raw
/// byte buffers replaced by `vpn-crypto` key/digest types where that
/// adds zeroize-on-drop for free.
pub struct IkeSa {
    pub peer_addr: IpAddr,
    pub peer_port: u16,
    pub local_port: u16,

    pub role: Phase1Role,
    pub auth_method: AuthMethod,
    pub initiator_cookie: u64,
    pub responder_cookie: u64,

    pub phase1_state: Phase1State,
    pub phase2_state: Phase2State,

    pub dh: Option<DiffieHellman>,
    pub peer_dh_public: Option<Vec<u8>>,
    pub shared_secret: Option<Vec<u8>>,

    pub nonce_i: Vec<u8>,
    pub nonce_r: Vec<u8>,

    /// Raw bytes of our outgoing SA payload body and ID payload body,
    /// retained verbatim for `HASH_I`/`HASH_R` (spec.md: "raw bytes
    /// re-used in HASH_I/HASH_R").
    pub sa_i_b: Vec<u8>,
    pub id_ii_b: Vec<u8>,
    pub id_ir_b: Vec<u8>,

    pub skeyid: Option<[u8; 20]>,
    pub skeyid_d: Option<[u8; 20]>,
    pub skeyid_a: Option<[u8; 20]>,
    pub skeyid_e: Option<Vec<u8>>,

    pub phase1_iv: Option<Vec<u8>>,
    pub phase2_message_id: u32,
    pub phase2_iv: Option<Vec<u8>>,
    pub phase2_des_key: Option<Vec<u8>>,

    pub our_spi: u32,
    pub peer_spi: u32,

    pub phase2_nonce_i: Vec<u8>,
    pub phase2_nonce_r: Vec<u8>,

    pub our_keymat: Option<Vec<u8>>,
    pub peer_keymat: Option<Vec<u8>>,

    pub established: bool,

    pub connect_timeout: Instant,
    pub last_comm: Instant,
    pub bytes_transferred: u64,

    pub phase1_established_tick: Option<Instant>,
    pub phase2_start_tick: Option<Instant>,
    pub phase2_started: bool,

    pub delete_me: bool,
}

impl IkeSa {
    pub fn new(peer_addr: IpAddr, peer_port: u16, local_port: u16, auth_method: AuthMethod, connect_timeout: Duration) -> IkeSa {
        let now = Instant::now();
        IkeSa {
            peer_addr,
            peer_port,
            local_port,
            role: Phase1Role::Initiator,
            auth_method,
            initiator_cookie: vpn_crypto::rand::random_u32() as u64 | ((vpn_crypto::rand::random_u32() as u64) << 32),
            responder_cookie: 0,
            phase1_state: Phase1State::Idle,
            phase2_state: Phase2State::NotStarted,
            dh: None,
            peer_dh_public: None,
            shared_secret: None,
            nonce_i: Vec::new(),
            nonce_r: Vec::new(),
            sa_i_b: Vec::new(),
            id_ii_b: Vec::new(),
            id_ir_b: Vec::new(),
            skeyid: None,
            skeyid_d: None,
            skeyid_a: None,
            skeyid_e: None,
            phase1_iv: None,
            phase2_message_id: 0,
            phase2_iv: None,
            phase2_des_key: None,
            our_spi: 0,
            peer_spi: 0,
            phase2_nonce_i: Vec::new(),
            phase2_nonce_r: Vec::new(),
            our_keymat: None,
            peer_keymat: None,
            established: false,
            connect_timeout: now + connect_timeout,
            last_comm: now,
            bytes_transferred: 0,
            phase1_established_tick: None,
            phase2_start_tick: None,
            phase2_started: false,
            delete_me: false,
        }
    }

    pub fn touch(&mut self, bytes: u64) {
        self.last_comm = Instant::now();
        self.bytes_transferred += bytes;
    }

    pub fn is_idle_timed_out(&self, idle_timeout: Duration) -> bool {
        self.last_comm.elapsed() >= idle_timeout
    }

    pub fn is_connect_timed_out(&self) -> bool {
        Instant::now() >= self.connect_timeout
    }

    /// Advances the running Phase-1/Phase-2 IV chain for `message_id`
    /// and returns the resulting 8-byte DES-CBC IV.
    pub fn advance_phase2_iv(&mut self, message_id: u32) -> [u8; 8] {
        let last_iv = self.phase2_iv.clone().unwrap_or_else(|| self.phase1_iv.clone().expect("Phase-1 IV must exist before Phase-2"));
        let iv = crate::kdf::phase2_iv(&last_iv, message_id, 8);
        self.phase2_iv = Some(iv.clone());
        let mut out = [0u8; 8];
        out.copy_from_slice(&iv[..8]);
        out
    }

    pub fn mark_dead(&mut self) {
        self.phase1_state = Phase1State::Dead;
        self.phase2_state = Phase2State::Dead;
        self.established = false;
    }
}
