use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpsecError {
    #[error("no incoming SA for SPI {0:#x}")]
    UnknownSpi(u32),

    #[error("ESP integrity check failed")]
    IntegrityCheckFailed,

    #[error("malformed ESP packet: {0}")]
    Malformed(&'static str),

    #[error("crypto failure: {0}")]
    Crypto(#[from] vpn_crypto::error::CryptoError),
}

pub type Result<T> = std::result::Result<T, IpsecError>;
