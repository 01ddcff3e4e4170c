use crate::error::{CryptoError, Result};
use block_modes::block_padding::NoPadding;
use block_modes::{BlockMode, Cbc};
use des::{Des, TdesEde3};

pub const DES_KEY_LEN: usize = 8;
pub const DES_BLOCK_LEN: usize = 8;
pub const TRIPLE_DES_KEY_LEN: usize = 24;

type DesCbc = Cbc<Des, NoPadding>;
type TripleDesCbc = Cbc<TdesEde3, NoPadding>;

/// Encrypts `plaintext` in place under DES-CBC. `plaintext.len()` must
/// already be a multiple of the block size; the ESP/IKE padding schemes
/// handle that before encryption runs.
pub fn des_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != DES_KEY_LEN {
        return Err(CryptoError::WrongKeyLength {
            expected: DES_KEY_LEN,
            actual: key.len(),
        });
    }
    if plaintext.len() % DES_BLOCK_LEN != 0 {
        return Err(CryptoError::NotBlockAligned(plaintext.len()));
    }
    let cipher = DesCbc::new_from_slices(key, iv).map_err(|_| CryptoError::WrongKeyLength {
        expected: DES_KEY_LEN,
        actual: key.len(),
    })?;
    Ok(cipher.encrypt_vec(plaintext))
}

pub fn des_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != DES_KEY_LEN {
        return Err(CryptoError::WrongKeyLength {
            expected: DES_KEY_LEN,
            actual: key.len(),
        });
    }
    if ciphertext.len() % DES_BLOCK_LEN != 0 {
        return Err(CryptoError::NotBlockAligned(ciphertext.len()));
    }
    let cipher = DesCbc::new_from_slices(key, iv).map_err(|_| CryptoError::WrongKeyLength {
        expected: DES_KEY_LEN,
        actual: key.len(),
    })?;
    cipher
        .decrypt_vec(ciphertext)
        .map_err(|_| CryptoError::NotBlockAligned(ciphertext.len()))
}

/// Three-key 3DES-CBC (EDE3), the stronger of the two transforms this
/// engine negotiates.
pub fn triple_des_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != TRIPLE_DES_KEY_LEN {
        return Err(CryptoError::WrongKeyLength {
            expected: TRIPLE_DES_KEY_LEN,
            actual: key.len(),
        });
    }
    if plaintext.len() % DES_BLOCK_LEN != 0 {
        return Err(CryptoError::NotBlockAligned(plaintext.len()));
    }
    let cipher =
        TripleDesCbc::new_from_slices(key, iv).map_err(|_| CryptoError::WrongKeyLength {
            expected: TRIPLE_DES_KEY_LEN,
            actual: key.len(),
        })?;
    Ok(cipher.encrypt_vec(plaintext))
}

pub fn triple_des_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != TRIPLE_DES_KEY_LEN {
        return Err(CryptoError::WrongKeyLength {
            expected: TRIPLE_DES_KEY_LEN,
            actual: key.len(),
        });
    }
    if ciphertext.len() % DES_BLOCK_LEN != 0 {
        return Err(CryptoError::NotBlockAligned(ciphertext.len()));
    }
    let cipher =
        TripleDesCbc::new_from_slices(key, iv).map_err(|_| CryptoError::WrongKeyLength {
            expected: TRIPLE_DES_KEY_LEN,
            actual: key.len(),
        })?;
    cipher
        .decrypt_vec(ciphertext)
        .map_err(|_| CryptoError::NotBlockAligned(ciphertext.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn des_cbc_roundtrip() {
        let key = [0x11u8; DES_KEY_LEN];
        let iv = [0x22u8; DES_BLOCK_LEN];
        let plaintext = [0x42u8; 16];
        let ciphertext = des_cbc_encrypt(&key, &iv, &plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let recovered = des_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn triple_des_cbc_roundtrip() {
        let key = [0x33u8; TRIPLE_DES_KEY_LEN];
        let iv = [0x44u8; DES_BLOCK_LEN];
        let plaintext = [0x55u8; 24];
        let ciphertext = triple_des_cbc_encrypt(&key, &iv, &plaintext).unwrap();
        let recovered = triple_des_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn rejects_unaligned_plaintext() {
        let key = [0x11u8; DES_KEY_LEN];
        let iv = [0x22u8; DES_BLOCK_LEN];
        assert!(des_cbc_encrypt(&key, &iv, &[1, 2, 3]).is_err());
    }
}
