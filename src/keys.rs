//! Keys
//!
//! Public key encoding (SubjectPublicKeyInfo):
//!   SEQUENCE { SEQUENCE { OID }, BIT STRING raw[32] }
//!
//! Private key encoding (PKCS#8 style):
//!   SEQUENCE { INTEGER 0, SEQUENCE { OID }, OCTET STRING (04 20 || raw[32]) }
//!
//! Password-protected private keys wrap the plain encoding with PBES2
//! (PBKDF2-HMAC-SHA384, AES-256-CBC) plus an HMAC-SHA384 tag.
//!
//! Both halves of a key carry a receiver id: the fingerprint of the encoded
//! public key, computed once when the key is created or imported.

use core::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::aead::random_bytes;
use crate::agreement;
use crate::config::FingerprintAlgorithm;
use crate::der::{Reader, Writer};
use crate::error::{DecodeError, Error, Result};
use crate::oid;
use crate::recipient;
use crate::wire;

pub const KEY_BYTES: usize = 32;

/// Truncated fingerprint length for [`FingerprintAlgorithm::Sha512Truncated`].
pub const SHORT_FINGERPRINT_BYTES: usize = 8;

// ---------------------------------------------------------------------------
// Algorithms and fingerprints
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// Signs, and agrees through conversion to X25519.
    #[default]
    Ed25519,
    /// Agreement only.
    X25519,
}

impl KeyAlgorithm {
    pub fn oid(self) -> &'static [u8] {
        match self {
            KeyAlgorithm::Ed25519 => oid::ED25519,
            KeyAlgorithm::X25519 => oid::X25519,
        }
    }

    pub fn from_oid(value: &[u8]) -> core::result::Result<Self, DecodeError> {
        match value {
            o if o == oid::ED25519 => Ok(KeyAlgorithm::Ed25519),
            o if o == oid::X25519 => Ok(KeyAlgorithm::X25519),
            _ => Err(DecodeError::UnsupportedAlgorithm("key algorithm")),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Ed25519 => write!(f, "ed25519"),
            KeyAlgorithm::X25519 => write!(f, "x25519"),
        }
    }
}

pub fn fingerprint(algorithm: FingerprintAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        FingerprintAlgorithm::Sha512Truncated => Sha512::digest(data)[..SHORT_FINGERPRINT_BYTES].to_vec(),
        FingerprintAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
    }
}

/// Identifies which recipient entry belongs to a key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReceiverId(Vec<u8>);

impl ReceiverId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for ReceiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReceiverId({self})")
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum SecretMaterial {
    Ed25519(SigningKey),
    X25519(StaticSecret),
}

#[derive(Clone, PartialEq, Eq)]
enum PublicMaterial {
    Ed25519(VerifyingKey),
    X25519(X25519Public),
}

#[derive(Clone)]
pub struct PrivateKey {
    material: SecretMaterial,
    receiver_id: ReceiverId,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    material: PublicMaterial,
    receiver_id: ReceiverId,
}

#[derive(Clone, Debug)]
pub struct Keypair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl Keypair {
    /// Fails with [`Error::RandomSource`] when the OS has no entropy to give.
    pub fn generate(algorithm: KeyAlgorithm, fp: FingerprintAlgorithm) -> Result<Self> {
        let raw = Zeroizing::new(random_bytes::<KEY_BYTES>()?);
        Ok(PrivateKey::from_raw(algorithm, &raw, fp).into_keypair())
    }
}

impl PrivateKey {
    fn from_material(material: SecretMaterial, fp: FingerprintAlgorithm) -> Self {
        let public = public_of(&material);
        let receiver_id = ReceiverId(fingerprint(fp, &encode_public(&public)));
        Self {
            material,
            receiver_id,
        }
    }

    /// Build a key from raw 32-byte secret material (an Ed25519 seed or an
    /// X25519 scalar).
    pub fn from_raw(algorithm: KeyAlgorithm, raw: &[u8; KEY_BYTES], fp: FingerprintAlgorithm) -> Self {
        let material = match algorithm {
            KeyAlgorithm::Ed25519 => SecretMaterial::Ed25519(SigningKey::from_bytes(raw)),
            KeyAlgorithm::X25519 => SecretMaterial::X25519(StaticSecret::from(*raw)),
        };
        Self::from_material(material, fp)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.material {
            SecretMaterial::Ed25519(_) => KeyAlgorithm::Ed25519,
            SecretMaterial::X25519(_) => KeyAlgorithm::X25519,
        }
    }

    pub fn receiver_id(&self) -> &ReceiverId {
        &self.receiver_id
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            material: public_of(&self.material),
            receiver_id: self.receiver_id.clone(),
        }
    }

    fn into_keypair(self) -> Keypair {
        Keypair {
            public_key: self.public_key(),
            private_key: self,
        }
    }

    /// X25519 secret used for Diffie-Hellman.
    pub(crate) fn agreement_secret(&self) -> StaticSecret {
        match &self.material {
            SecretMaterial::Ed25519(sk) => agreement::ed25519_secret_to_x25519(sk),
            SecretMaterial::X25519(s) => s.clone(),
        }
    }

    /// Signing half; agreement-only keys cannot sign.
    pub(crate) fn signing_key(&self) -> Result<&SigningKey> {
        match &self.material {
            SecretMaterial::Ed25519(sk) => Ok(sk),
            SecretMaterial::X25519(_) => Err(Error::UnsupportedKeyType),
        }
    }

    fn raw(&self) -> Zeroizing<[u8; KEY_BYTES]> {
        match &self.material {
            SecretMaterial::Ed25519(sk) => Zeroizing::new(sk.to_bytes()),
            SecretMaterial::X25519(s) => Zeroizing::new(s.to_bytes()),
        }
    }

    pub fn to_der(&self) -> Zeroizing<Vec<u8>> {
        let raw = self.raw();
        let mut inner = Zeroizing::new(Vec::with_capacity(2 + KEY_BYTES));
        inner.extend_from_slice(&[0x04, KEY_BYTES as u8]);
        inner.extend_from_slice(&raw[..]);

        let mut w = Writer::new();
        w.sequence(|w| {
            w.integer_u64(0);
            w.sequence(|w| w.oid(self.algorithm().oid()));
            w.octet_string(&inner);
        });
        Zeroizing::new(w.into_bytes())
    }

    pub fn from_der(data: &[u8], fp: FingerprintAlgorithm) -> Result<Self> {
        let mut outer = Reader::new(data);
        let mut r = outer.sequence()?;
        outer.finish()?;
        r.version(0)?;
        let mut alg = r.sequence()?;
        let algorithm = KeyAlgorithm::from_oid(alg.oid()?)?;
        alg.finish()?;
        let mut inner = Reader::new(r.octet_string()?);
        r.finish()?;
        let raw = inner.octet_string()?;
        inner.finish()?;
        let raw: &[u8; KEY_BYTES] = raw
            .try_into()
            .map_err(|_| Error::InvalidKey("private key length"))?;
        Ok(Self::from_raw(algorithm, raw, fp))
    }

    /// Password-protected encoding.
    pub fn to_encrypted_der(&self, password: &[u8], iterations: u32) -> Result<Vec<u8>> {
        let plain = self.to_der();
        let wrap = recipient::wrap_with_password(&plain, password, iterations)?;
        Ok(wire::encode_encrypted_key(&wrap))
    }

    /// A wrong password surfaces as [`Error::TagMismatch`].
    pub fn from_encrypted_der(data: &[u8], password: &[u8], fp: FingerprintAlgorithm) -> Result<Self> {
        let wrap = wire::decode_encrypted_key(data)?;
        let plain = recipient::unwrap_with_password(&wrap, password)?;
        Self::from_der(&plain, fp)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm())
            .field("receiver_id", &self.receiver_id)
            .finish_non_exhaustive()
    }
}

fn public_of(material: &SecretMaterial) -> PublicMaterial {
    match material {
        SecretMaterial::Ed25519(sk) => PublicMaterial::Ed25519(sk.verifying_key()),
        SecretMaterial::X25519(s) => PublicMaterial::X25519(X25519Public::from(s)),
    }
}

fn encode_public(material: &PublicMaterial) -> Vec<u8> {
    let (oid, raw) = match material {
        PublicMaterial::Ed25519(vk) => (oid::ED25519, vk.to_bytes()),
        PublicMaterial::X25519(pk) => (oid::X25519, pk.to_bytes()),
    };
    let mut w = Writer::new();
    w.sequence(|w| {
        w.sequence(|w| w.oid(oid));
        w.bit_string(&raw);
    });
    w.into_bytes()
}

impl PublicKey {
    pub fn from_raw(algorithm: KeyAlgorithm, raw: &[u8; KEY_BYTES], fp: FingerprintAlgorithm) -> Result<Self> {
        let material = match algorithm {
            KeyAlgorithm::Ed25519 => PublicMaterial::Ed25519(VerifyingKey::from_bytes(raw)?),
            KeyAlgorithm::X25519 => PublicMaterial::X25519(X25519Public::from(*raw)),
        };
        let receiver_id = ReceiverId(fingerprint(fp, &encode_public(&material)));
        Ok(Self {
            material,
            receiver_id,
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.material {
            PublicMaterial::Ed25519(_) => KeyAlgorithm::Ed25519,
            PublicMaterial::X25519(_) => KeyAlgorithm::X25519,
        }
    }

    pub fn receiver_id(&self) -> &ReceiverId {
        &self.receiver_id
    }

    pub fn to_bytes(&self) -> [u8; KEY_BYTES] {
        match &self.material {
            PublicMaterial::Ed25519(vk) => vk.to_bytes(),
            PublicMaterial::X25519(pk) => pk.to_bytes(),
        }
    }

    /// X25519 point used for Diffie-Hellman.
    pub(crate) fn agreement_public(&self) -> X25519Public {
        match &self.material {
            PublicMaterial::Ed25519(vk) => agreement::ed25519_public_to_x25519(vk),
            PublicMaterial::X25519(pk) => *pk,
        }
    }

    pub(crate) fn verifying_key(&self) -> Result<&VerifyingKey> {
        match &self.material {
            PublicMaterial::Ed25519(vk) => Ok(vk),
            PublicMaterial::X25519(_) => Err(Error::UnsupportedKeyType),
        }
    }

    pub fn to_der(&self) -> Vec<u8> {
        encode_public(&self.material)
    }

    pub fn from_der(data: &[u8], fp: FingerprintAlgorithm) -> Result<Self> {
        let mut outer = Reader::new(data);
        let mut r = outer.sequence()?;
        outer.finish()?;
        let mut alg = r.sequence()?;
        let algorithm = KeyAlgorithm::from_oid(alg.oid()?)?;
        alg.finish()?;
        let raw = r.bit_string()?;
        r.finish()?;
        let raw: &[u8; KEY_BYTES] = raw
            .try_into()
            .map_err(|_| Error::InvalidKey("public key length"))?;
        Self::from_raw(algorithm, raw, fp)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("algorithm", &self.algorithm())
            .field("receiver_id", &self.receiver_id)
            .field("key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP: FingerprintAlgorithm = FingerprintAlgorithm::Sha512Truncated;

    #[test]
    fn test_receiver_id_is_fingerprint_of_encoding() {
        for alg in [KeyAlgorithm::Ed25519, KeyAlgorithm::X25519] {
            let kp = Keypair::generate(alg, FP).unwrap();
            let der = kp.public_key.to_der();
            assert_eq!(kp.public_key.receiver_id().as_bytes(), fingerprint(FP, &der).as_slice());
            assert_eq!(kp.private_key.receiver_id(), kp.public_key.receiver_id());
            assert_eq!(kp.public_key.receiver_id().as_bytes().len(), SHORT_FINGERPRINT_BYTES);
        }
    }

    #[test]
    fn test_generate_draws_fresh_keys() {
        let a = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        let b = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        assert_ne!(a.public_key, b.public_key);
        assert_ne!(a.private_key.to_der().as_slice(), b.private_key.to_der().as_slice());
    }

    #[test]
    fn test_sha256_fingerprint_length() {
        let kp = Keypair::generate(KeyAlgorithm::Ed25519, FingerprintAlgorithm::Sha256).unwrap();
        assert_eq!(kp.public_key.receiver_id().as_bytes().len(), 32);
    }

    #[test]
    fn test_public_key_der_layout() {
        let kp = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        let der = kp.public_key.to_der();
        assert_eq!(&der[..12], &[0x30, 0x2A, 0x30, 0x05, 0x06, 0x03, 0x2B, 0x65, 0x70, 0x03, 0x21, 0x00]);
        assert_eq!(&der[12..], &kp.public_key.to_bytes());
    }

    #[test]
    fn test_private_key_der_roundtrip() {
        for alg in [KeyAlgorithm::Ed25519, KeyAlgorithm::X25519] {
            let kp = Keypair::generate(alg, FP).unwrap();
            let der = kp.private_key.to_der();
            let back = PrivateKey::from_der(&der, FP).unwrap();
            assert_eq!(back.algorithm(), alg);
            assert_eq!(back.public_key(), kp.public_key);
        }
    }

    #[test]
    fn test_private_key_der_layout() {
        let key = PrivateKey::from_raw(KeyAlgorithm::Ed25519, &[7u8; 32], FP);
        let der = key.to_der();
        let mut expected = hex::decode("302e020100300506032b657004220420").unwrap();
        expected.extend_from_slice(&[7u8; 32]);
        assert_eq!(der.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_encrypted_private_key() {
        let kp = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap();
        let enc = kp.private_key.to_encrypted_der(b"hunter2", 10_000).unwrap();
        let back = PrivateKey::from_encrypted_der(&enc, b"hunter2", FP).unwrap();
        assert_eq!(back.public_key(), kp.public_key);

        let wrong = PrivateKey::from_encrypted_der(&enc, b"hunter3", FP);
        assert!(matches!(wrong, Err(Error::TagMismatch)));
    }

    #[test]
    fn test_invalid_ed25519_point_rejected() {
        // y = 2 is not on the curve.
        let mut raw = [0u8; 32];
        raw[0] = 2;
        let result = PublicKey::from_raw(KeyAlgorithm::Ed25519, &raw, FP);
        assert!(matches!(result, Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_agreement_only_key_cannot_sign() {
        let kp = Keypair::generate(KeyAlgorithm::X25519, FP).unwrap();
        assert!(matches!(kp.private_key.signing_key(), Err(Error::UnsupportedKeyType)));
        assert!(matches!(kp.public_key.verifying_key(), Err(Error::UnsupportedKeyType)));
    }

    #[test]
    fn test_unknown_key_oid() {
        let mut der = Keypair::generate(KeyAlgorithm::Ed25519, FP).unwrap().public_key.to_der();
        der[8] = 0x71; // 1.3.101.113 (Ed448)
        assert!(matches!(
            PublicKey::from_der(&der, FP),
            Err(Error::UnsupportedAlgorithm("key algorithm"))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = PrivateKey::from_raw(KeyAlgorithm::Ed25519, &[0xEE; 32], FP);
        let dbg = format!("{key:?}");
        assert!(!dbg.contains("eeee"));
    }
}
