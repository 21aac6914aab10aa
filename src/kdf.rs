//! Key derivation
//!
//! Recipient key wrapping (public-key and password recipients alike):
//!   okm      = KDF2-SHA384(shared, 80)  or  PBKDF2-HMAC-SHA384(password, salt, iterations, 80)
//!   wrap_key = okm[0..32]    (AES-256-CBC)
//!   mac_key  = okm[32..80]   (HMAC-SHA384)
//!
//! X3DH and PFS use HKDF-SHA256.

use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha384};
use zeroize::Zeroizing;

use crate::error::Result;

pub const WRAP_KEY_BYTES: usize = 32;
pub const MAC_KEY_BYTES: usize = 48;
pub const WRAP_MATERIAL_BYTES: usize = WRAP_KEY_BYTES + MAC_KEY_BYTES;

/// KDF2 (ISO/IEC 18033-2) over SHA-384:
/// `out = H(secret || 1) || H(secret || 2) || ...`, counters 4-byte big-endian.
pub fn kdf2_sha384(secret: &[u8], out: &mut [u8]) {
    for (i, block) in out.chunks_mut(48).enumerate() {
        let counter = (i as u32).wrapping_add(1);
        let mut h = Sha384::new();
        h.update(secret);
        h.update(counter.to_be_bytes());
        let digest = h.finalize();
        block.copy_from_slice(&digest[..block.len()]);
    }
}

pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, out)?;
    Ok(())
}

pub fn pbkdf2_sha384(password: &[u8], salt: &[u8], iterations: u32, out: &mut [u8]) {
    pbkdf2::pbkdf2_hmac::<Sha384>(password, salt, iterations, out);
}

/// The two keys protecting one wrapped secret.
pub struct WrapKeys {
    pub wrap_key: Zeroizing<[u8; WRAP_KEY_BYTES]>,
    pub mac_key: Zeroizing<[u8; MAC_KEY_BYTES]>,
}

impl WrapKeys {
    fn split(okm: &[u8; WRAP_MATERIAL_BYTES]) -> Self {
        let mut wrap_key = Zeroizing::new([0u8; WRAP_KEY_BYTES]);
        let mut mac_key = Zeroizing::new([0u8; MAC_KEY_BYTES]);
        wrap_key.copy_from_slice(&okm[..WRAP_KEY_BYTES]);
        mac_key.copy_from_slice(&okm[WRAP_KEY_BYTES..]);
        Self { wrap_key, mac_key }
    }

    pub fn from_shared_secret(shared: &[u8]) -> Self {
        let mut okm = Zeroizing::new([0u8; WRAP_MATERIAL_BYTES]);
        kdf2_sha384(shared, &mut okm[..]);
        Self::split(&okm)
    }

    pub fn from_password(password: &[u8], salt: &[u8], iterations: u32) -> Self {
        let mut okm = Zeroizing::new([0u8; WRAP_MATERIAL_BYTES]);
        pbkdf2_sha384(password, salt, iterations, &mut okm[..]);
        Self::split(&okm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf2_blocks() {
        let secret = b"shared secret";
        let mut out = [0u8; 80];
        kdf2_sha384(secret, &mut out);

        let mut first = Sha384::new();
        first.update(secret);
        first.update([0, 0, 0, 1]);
        let mut second = Sha384::new();
        second.update(secret);
        second.update([0, 0, 0, 2]);

        assert_eq!(&out[..48], first.finalize().as_slice());
        assert_eq!(&out[48..], &second.finalize()[..32]);
    }

    #[test]
    fn test_kdf2_prefix_stable() {
        let mut short = [0u8; 32];
        let mut long = [0u8; 100];
        kdf2_sha384(b"k", &mut short);
        kdf2_sha384(b"k", &mut long);
        assert_eq!(short, long[..32]);
    }

    #[test]
    fn test_hkdf_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();
        let mut okm = [0u8; 42];
        hkdf_sha256(&ikm, Some(&salt), &info, &mut okm).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_hkdf_rejects_oversized_output() {
        let mut okm = vec![0u8; 255 * 32 + 1];
        assert!(hkdf_sha256(b"ikm", None, b"", &mut okm).is_err());
    }

    #[test]
    fn test_password_keys_depend_on_salt() {
        let a = WrapKeys::from_password(b"pw", b"salt-a", 1000);
        let b = WrapKeys::from_password(b"pw", b"salt-b", 1000);
        assert_ne!(*a.wrap_key, *b.wrap_key);
        assert_ne!(*a.mac_key, *b.mac_key);
    }
}
