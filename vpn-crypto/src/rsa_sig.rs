use crate::error::{CryptoError, Result};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Hash, PaddingScheme, PublicKey, RsaPrivateKey, RsaPublicKey};
use x509_parser::prelude::*;

/// RSA keypair used for Phase-1 RSA-signature authentication (RFC 2409
/// section 5.3): the engine signs HASH_I/HASH_R with its own private key
/// and verifies the peer's signature against the public key from its
/// certificate.
pub struct RsaSigner {
    private_key: RsaPrivateKey,
}

impl RsaSigner {
    pub fn from_pkcs8_der(der: &[u8]) -> Result<RsaSigner> {
        let private_key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|_| CryptoError::MalformedCertificate("private key is not valid PKCS#8 DER"))?;
        Ok(RsaSigner { private_key })
    }

    /// Signs a SHA-1 digest with PKCS#1 v1.5 padding, as IKEv1 requires.
    pub fn sign_sha1(&self, digest: &[u8; 20]) -> Result<Vec<u8>> {
        let padding = PaddingScheme::PKCS1v15Sign {
            hash: Some(Hash::SHA1),
        };
        self.private_key
            .sign(padding, digest)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

/// A peer's RSA public key, as extracted from an X.509 certificate.
pub struct RsaVerifier {
    public_key: RsaPublicKey,
}

impl RsaVerifier {
    /// Parses a DER-encoded X.509 certificate and extracts its RSA
    /// public key, the way the engine's IKE cert exchange hands off an
    /// ID_DER_ASN1_DN / CERT payload to the signature check.
    pub fn from_certificate_der(der: &[u8]) -> Result<RsaVerifier> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|_| CryptoError::MalformedCertificate("not a valid DER certificate"))?;
        let spki = cert.public_key();
        let public_key = RsaPublicKey::from_public_key_der(spki.raw)
            .map_err(|_| CryptoError::MalformedCertificate("SubjectPublicKeyInfo is not RSA"))?;
        Ok(RsaVerifier { public_key })
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<RsaVerifier> {
        let public_key = RsaPublicKey::from_public_key_der(der)
            .map_err(|_| CryptoError::MalformedCertificate("public key is not valid DER"))?;
        Ok(RsaVerifier { public_key })
    }

    pub fn verify_sha1(&self, digest: &[u8; 20], signature: &[u8]) -> Result<()> {
        let padding = PaddingScheme::PKCS1v15Sign {
            hash: Some(Hash::SHA1),
        };
        self.public_key
            .verify(padding, digest, signature)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
    use rsa::RsaPrivateKey;

    fn generate_keypair() -> (RsaSigner, RsaVerifier) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        let priv_der = private.to_pkcs8_der().unwrap();
        let pub_der = public.to_public_key_der().unwrap();
        (
            RsaSigner::from_pkcs8_der(priv_der.as_bytes()).unwrap(),
            RsaVerifier::from_pkcs8_der(pub_der.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let (signer, verifier) = generate_keypair();
        let digest = crate::sha1(b"HASH_I over SKEYID");
        let signature = signer.sign_sha1(&digest).unwrap();
        assert!(verifier.verify_sha1(&digest, &signature).is_ok());
    }

    #[test]
    fn tampered_digest_fails_verification() {
        let (signer, verifier) = generate_keypair();
        let digest = crate::sha1(b"HASH_I over SKEYID");
        let signature = signer.sign_sha1(&digest).unwrap();
        let tampered = crate::sha1(b"something else");
        assert!(verifier.verify_sha1(&tampered, &signature).is_err());
    }
}
