use thiserror::Error;

#[derive(Debug, Error)]
pub enum IkeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),

    #[error("unsupported exchange type {0}")]
    UnsupportedExchange(u8),

    #[error("no acceptable proposal in SA payload")]
    NoAcceptableProposal,

    #[error("peer HASH did not verify")]
    HashMismatch,

    #[error("peer signature did not verify")]
    SignatureInvalid,

    #[error("unexpected message for state {0:?}")]
    UnexpectedMessage(crate::sa::Phase1State),

    #[error("crypto failure: {0}")]
    Crypto(#[from] vpn_crypto::error::CryptoError),
}

pub type Result<T> = std::result::Result<T, IkeError>;
