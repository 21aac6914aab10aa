//! Recipient ciphers
//!
//! Public-key recipient:
//!   (e, E)          = fresh X25519 keypair
//!   shared          = X25519(e, P)               P converted from Ed25519 if needed
//!   wrap_key/mac_key = KDF2-SHA384(shared, 80)
//!   wrapped         = AES-256-CBC(wrap_key, iv, CEK) with PKCS#7 padding
//!   tag             = HMAC-SHA384(mac_key, iv || wrapped)
//!
//! Password recipient: same wrap, keys from PBKDF2-HMAC-SHA384(password, salt, n).
//!
//! Unwrapping checks the tag in constant time before any decryption; every
//! failure after decoding is reported as [`Error::TagMismatch`].

use aes::cipher::generic_array::GenericArray;
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha384;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::aead::random_bytes;
use crate::agreement;
use crate::config::{MAX_PASSWORD_ITERATIONS, MIN_PASSWORD_ITERATIONS};
use crate::error::{Error, Result};
use crate::kdf::WrapKeys;
use crate::keys::{PrivateKey, PublicKey};
use crate::wire::{KeyRecipient, PasswordWrap, CBC_IV_BYTES, HMAC_TAG_BYTES};

type HmacSha384 = Hmac<Sha384>;
type CbcEncryptor = cbc::Encryptor<Aes256>;
type CbcDecryptor = cbc::Decryptor<Aes256>;

pub const SALT_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// Authenticated CBC wrap
// ---------------------------------------------------------------------------

fn mac(keys: &WrapKeys, iv: &[u8], wrapped: &[u8]) -> Result<HmacSha384> {
    let mut m = <HmacSha384 as Mac>::new_from_slice(&keys.mac_key[..])
        .map_err(|_| Error::InvalidKey("hmac key length"))?;
    m.update(iv);
    m.update(wrapped);
    Ok(m)
}

struct Sealed {
    iv: [u8; CBC_IV_BYTES],
    wrapped: Vec<u8>,
    tag: [u8; HMAC_TAG_BYTES],
}

fn seal(keys: &WrapKeys, secret: &[u8]) -> Result<Sealed> {
    let iv: [u8; CBC_IV_BYTES] = random_bytes()?;
    let wrapped = CbcEncryptor::new(
        GenericArray::from_slice(&keys.wrap_key[..]),
        GenericArray::from_slice(&iv),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(secret);
    let mut tag = [0u8; HMAC_TAG_BYTES];
    tag.copy_from_slice(&mac(keys, &iv, &wrapped)?.finalize().into_bytes());
    Ok(Sealed { iv, wrapped, tag })
}

fn open(keys: &WrapKeys, iv: &[u8; CBC_IV_BYTES], wrapped: &[u8], tag: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    mac(keys, iv, wrapped)?
        .verify_slice(tag)
        .map_err(|_| Error::TagMismatch)?;
    CbcDecryptor::new(
        GenericArray::from_slice(&keys.wrap_key[..]),
        GenericArray::from_slice(iv),
    )
    .decrypt_padded_vec_mut::<Pkcs7>(wrapped)
    .map(Zeroizing::new)
    .map_err(|_| Error::TagMismatch)
}

// ---------------------------------------------------------------------------
// Public-key recipients
// ---------------------------------------------------------------------------

/// Wrap `cek` for the holder of `recipient`.
pub fn wrap_for_public_key(cek: &[u8], recipient: &PublicKey) -> Result<KeyRecipient> {
    let seed = Zeroizing::new(random_bytes::<32>()?);
    let ephemeral = StaticSecret::from(*seed);
    let ephemeral_public = X25519Public::from(&ephemeral);
    let shared = agreement::diffie_hellman(&ephemeral, &recipient.agreement_public())?;
    let keys = WrapKeys::from_shared_secret(&shared[..]);
    let sealed = seal(&keys, cek)?;
    Ok(KeyRecipient {
        recipient_id: recipient.receiver_id().as_bytes().to_vec(),
        key_algorithm: recipient.algorithm(),
        ephemeral_key: ephemeral_public.to_bytes(),
        iv: sealed.iv,
        wrapped_key: sealed.wrapped,
        tag: sealed.tag,
    })
}

pub fn unwrap_with_private_key(info: &KeyRecipient, key: &PrivateKey) -> Result<Zeroizing<Vec<u8>>> {
    let ephemeral = X25519Public::from(info.ephemeral_key);
    let shared = agreement::diffie_hellman(&key.agreement_secret(), &ephemeral)
        .map_err(|_| Error::TagMismatch)?;
    let keys = WrapKeys::from_shared_secret(&shared[..]);
    open(&keys, &info.iv, &info.wrapped_key, &info.tag)
}

// ---------------------------------------------------------------------------
// Password recipients
// ---------------------------------------------------------------------------

pub fn wrap_with_password(secret: &[u8], password: &[u8], iterations: u32) -> Result<PasswordWrap> {
    if iterations < MIN_PASSWORD_ITERATIONS {
        return Err(Error::InvalidParameter("password iterations below minimum"));
    }
    if iterations > MAX_PASSWORD_ITERATIONS {
        return Err(Error::InvalidParameter("password iterations above maximum"));
    }
    let salt: [u8; SALT_BYTES] = random_bytes()?;
    let keys = WrapKeys::from_password(password, &salt, iterations);
    let sealed = seal(&keys, secret)?;
    Ok(PasswordWrap {
        salt: salt.to_vec(),
        iterations,
        iv: sealed.iv,
        wrapped_key: sealed.wrapped,
        tag: sealed.tag,
    })
}

/// Iteration counts outside the accepted range are refused without running
/// the KDF.
pub fn unwrap_with_password(info: &PasswordWrap, password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if !(MIN_PASSWORD_ITERATIONS..=MAX_PASSWORD_ITERATIONS).contains(&info.iterations) {
        return Err(Error::InvalidParameter("password iterations out of range"));
    }
    let keys = WrapKeys::from_password(password, &info.salt, info.iterations);
    open(&keys, &info.iv, &info.wrapped_key, &info.tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintAlgorithm;
    use crate::keys::{KeyAlgorithm, Keypair};

    const FP: FingerprintAlgorithm = FingerprintAlgorithm::Sha512Truncated;
    const CEK: [u8; 32] = [0x11; 32];

    #[test]
    fn test_key_wrap_roundtrip() {
        for alg in [KeyAlgorithm::Ed25519, KeyAlgorithm::X25519] {
            let kp = Keypair::generate(alg, FP).unwrap();
            let info = wrap_for_public_key(&CEK, &kp.public_key).unwrap();
            assert_eq!(info.wrapped_key.len(), 48);
            assert_eq!(info.recipient_id, kp.public_key.receiver_id().as_bytes());
            let cek = unwrap_with_private_key(&info, &kp.private_key).unwrap();
            assert_eq!(cek.as_slice(), &CEK);
        }
    }

    #[test]
    fn test_fresh_ephemeral_per_wrap() {
        let kp = Keypair::generate(KeyAlgorithm::X25519, FP).unwrap();
        let a = wrap_for_public_key(&CEK, &kp.public_key).unwrap();
        let b = wrap_for_public_key(&CEK, &kp.public_key).unwrap();
        assert_ne!(a.ephemeral_key, b.ephemeral_key);
        assert_ne!(a.wrapped_key, b.wrapped_key);
    }

    #[test]
    fn test_key_wrap_wrong_key() {
        let kp = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        let other = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        let info = wrap_for_public_key(&CEK, &kp.public_key).unwrap();
        assert!(matches!(
            unwrap_with_private_key(&info, &other.private_key),
            Err(Error::TagMismatch)
        ));
    }

    #[test]
    fn test_tampering_any_field_fails() {
        let kp = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        let info = wrap_for_public_key(&CEK, &kp.public_key).unwrap();

        let mut t = info.clone();
        t.iv[0] ^= 1;
        assert!(matches!(unwrap_with_private_key(&t, &kp.private_key), Err(Error::TagMismatch)));

        let mut t = info.clone();
        t.wrapped_key[47] ^= 1;
        assert!(matches!(unwrap_with_private_key(&t, &kp.private_key), Err(Error::TagMismatch)));

        let mut t = info.clone();
        t.tag[0] ^= 1;
        assert!(matches!(unwrap_with_private_key(&t, &kp.private_key), Err(Error::TagMismatch)));

        let mut t = info;
        t.ephemeral_key[5] ^= 1;
        assert!(unwrap_with_private_key(&t, &kp.private_key).is_err());
    }

    #[test]
    fn test_password_roundtrip() {
        let info = wrap_with_password(&CEK, b"correct horse", MIN_PASSWORD_ITERATIONS).unwrap();
        assert_eq!(info.salt.len(), SALT_BYTES);
        let cek = unwrap_with_password(&info, b"correct horse").unwrap();
        assert_eq!(cek.as_slice(), &CEK);
        assert!(matches!(unwrap_with_password(&info, b"wrong"), Err(Error::TagMismatch)));
    }

    #[test]
    fn test_password_iteration_bounds() {
        assert!(matches!(
            wrap_with_password(&CEK, b"pw", MIN_PASSWORD_ITERATIONS - 1),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            wrap_with_password(&CEK, b"pw", MAX_PASSWORD_ITERATIONS + 1),
            Err(Error::InvalidParameter(_))
        ));
        let mut info = wrap_with_password(&CEK, b"pw", MIN_PASSWORD_ITERATIONS).unwrap();
        info.iterations = MAX_PASSWORD_ITERATIONS + 1;
        assert!(matches!(unwrap_with_password(&info, b"pw"), Err(Error::InvalidParameter(_))));
    }
}
