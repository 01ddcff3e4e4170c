use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key material has the wrong length: expected {expected}, got {actual}")]
    WrongKeyLength { expected: usize, actual: usize },

    #[error("ciphertext/plaintext length {0} is not a multiple of the block size")]
    NotBlockAligned(usize),

    #[error("HMAC verification failed")]
    MacMismatch,

    #[error("RSA signature verification failed")]
    SignatureInvalid,

    #[error("malformed DER/X.509 input: {0}")]
    MalformedCertificate(&'static str),

    #[error("Diffie-Hellman public value is out of the valid range")]
    InvalidDhPublicValue,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
