//! `VpnConfig`: the recognized configuration schema (spec.md §6). Reading
//! one from a file is out of scope; this is the shape an external parser
//! produces.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RouterMode {
    L2Trans,
    L3Trans,
    L3IPsec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VpnAuthMethod {
    Password,
    Cert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Phase1Mode {
    Main,
    Aggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CryptoAlgo {
    DesCbc,
    TripleDesCbc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V4Config {
    pub bind: Ipv4Addr,
    pub guest_ip: Ipv4Addr,
    pub guest_mtu: u16,
    pub guest_virtual_gateway: Ipv4Addr,
    pub dhcp_enabled: bool,
    pub dhcp_pool_start: Ipv4Addr,
    pub dhcp_pool_end: Ipv4Addr,
    pub dhcp_lease_seconds: u32,
    pub dhcp_dns: Vec<Ipv4Addr>,
    pub dhcp_domain: Option<String>,
    pub host_ip: Ipv4Addr,
    pub host_mtu: u16,
    pub host_ip_default_gateway: Ipv4Addr,
    pub arp_expires_seconds: u64,
    pub arp_dont_update_expires: bool,
    pub adjust_tcp_mss: Option<u16>,
    pub use_proxy_arp: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V6Config {
    pub bind: Ipv6Addr,
    pub guest_ip: Ipv6Addr,
    pub guest_mtu: u16,
    pub guest_virtual_gateway: Ipv6Addr,
    pub ra_enabled: bool,
    pub ra_prefix: Ipv6Addr,
    pub ra_prefix_len: u8,
    pub ra_lifetime_seconds: u32,
    pub ra_dns: Vec<Ipv6Addr>,
    pub host_ip: Ipv6Addr,
    pub host_mtu: u16,
    pub neighbor_expires_seconds: u64,
    pub use_proxy_ndp: bool,
    pub phase2_strict_id_v6: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VpnConfig {
    pub mode: RouterMode,
    pub virtual_gateway_mac: [u8; 6],
    pub v4: Option<V4Config>,
    pub v6: Option<V6Config>,

    pub vpn_gateway_address: Ipv4Addr,
    pub vpn_auth_method: VpnAuthMethod,
    pub vpn_password: Option<String>,
    pub vpn_id_string: String,
    pub vpn_cert_name: Option<String>,
    pub vpn_ca_cert_name: Option<String>,
    pub vpn_rsa_key_name: Option<String>,
    pub vpn_specify_issuer: bool,
    pub vpn_phase1_mode: Phase1Mode,
    pub vpn_phase1_crypto: CryptoAlgo,
    pub vpn_phase2_crypto: CryptoAlgo,
    pub vpn_phase1_life_seconds: u64,
    pub vpn_phase1_life_kilobytes: u64,
    pub vpn_phase2_life_seconds: u64,
    pub vpn_phase2_life_kilobytes: u64,
    pub vpn_wait_phase2_blank_span_ms: u64,
    pub vpn_connect_timeout_ms: u64,
    pub vpn_idle_timeout_seconds: u64,
    pub vpn_ping_target: Option<Ipv4Addr>,
    pub vpn_ping_interval_seconds: u64,
    pub vpn_ping_msg_size: usize,
    pub vpn_phase1_aggressive_cleartext_hash: bool,
}

impl VpnConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.vpn_connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.vpn_idle_timeout_seconds)
    }

    pub fn phase2_blank_span(&self) -> Duration {
        Duration::from_millis(self.vpn_wait_phase2_blank_span_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.vpn_ping_interval_seconds)
    }

    /// Returns `false` (the only externally observable `client_start`
    /// failure mode) when the schema is internally inconsistent.
    pub fn is_valid(&self) -> bool {
        if self.mode == RouterMode::L3IPsec && self.v4.is_none() && self.v6.is_none() {
            return false;
        }
        if self.vpn_auth_method == VpnAuthMethod::Password && self.vpn_password.is_none() {
            return false;
        }
        if self.vpn_auth_method == VpnAuthMethod::Cert && self.vpn_cert_name.is_none() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VpnConfig {
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
                adjust_tcp_mss: Some(1400),
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
            vpn_ping_target: Some(Ipv4Addr::new(10, 0, 0, 1)),
            vpn_ping_interval_seconds: 30,
            vpn_ping_msg_size: 32,
            vpn_phase1_aggressive_cleartext_hash: false,
        }
    }

    #[test]
    fn valid_config_accepted() {
        assert!(sample().is_valid());
    }

    #[test]
    fn password_auth_without_password_is_invalid() {
        let mut config = sample();
        config.vpn_password = None;
        assert!(!config.is_valid());
    }
}
