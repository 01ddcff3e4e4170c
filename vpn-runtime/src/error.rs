use thiserror::Error;

/// The four fault kinds the engine recognizes, each with its own
/// propagation policy (drop-and-log, except `Resource` which is fatal).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("resource exhausted: {0}")]
    Resource(&'static str),

    #[error("timeout: {0}")]
    Timeout(&'static str),

    #[error("idle: no tunnel traffic for {0:?}")]
    Idle(std::time::Duration),
}

impl From<vpn_ike::IkeError> for EngineError {
    fn from(err: vpn_ike::IkeError) -> EngineError {
        EngineError::Crypto(err.to_string())
    }
}

impl From<vpn_ipsec::IpsecError> for EngineError {
    fn from(err: vpn_ipsec::IpsecError) -> EngineError {
        EngineError::Crypto(err.to_string())
    }
}

impl From<&'static str> for EngineError {
    fn from(err: &'static str) -> EngineError {
        EngineError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
