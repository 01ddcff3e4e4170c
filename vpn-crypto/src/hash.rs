use sha1::{Digest, Sha1};
use md5::Md5;

pub const SHA1_HASH_LEN: usize = 20;
pub const MD5_HASH_LEN: usize = 16;

pub fn sha1(data: &[u8]) -> [u8; SHA1_HASH_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; SHA1_HASH_LEN];
    out.copy_from_slice(&result);
    out
}

pub fn md5(data: &[u8]) -> [u8; MD5_HASH_LEN] {
    let mut hasher = Md5::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; MD5_HASH_LEN];
    out.copy_from_slice(&result);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_answer() {
        let digest = sha1(b"abc");
        assert_eq!(
            hex::encode(digest),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn md5_known_answer() {
        let digest = md5(b"abc");
        assert_eq!(hex::encode(digest), "900150983cd24fb0d6963f7d28e17f72");
    }
}
