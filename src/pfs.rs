//! Forward-secure sessions over an X3DH secret.
//!
//! ```text
//! key_a      = SK[0..32]      initiator -> responder
//! key_b      = SK[32..64]     responder -> initiator
//! session_id = HKDF-SHA256(salt = ad, ikm = SK, info = "session")[0..32]
//!
//! per message:
//!   salt        = 16 random bytes
//!   key || nonce = HKDF-SHA256(salt, ikm = sending key, info = MESSAGE_INFO)[0..44]
//!   ciphertext  = AES-256-GCM(key, nonce, ad, plaintext)
//! ```
//!
//! A session never changes after it is created, so it can be shared between
//! threads. Salts must never repeat under one session; nothing here tracks
//! them, and that is the caller's obligation.

use core::fmt;

use zeroize::Zeroizing;

use crate::aead::{aead_open, aead_seal, random_bytes};
use crate::error::{Error, Result};
use crate::kdf::hkdf_sha256;
use crate::wire::{AES_KEY_BYTES, NONCE_BYTES};
use crate::x3dh::SharedSecret;

pub const SESSION_ID_BYTES: usize = 32;
pub const SALT_BYTES: usize = 16;

const SESSION_INFO: &[u8] = b"session";
const MESSAGE_INFO: &[u8] = b"hybrid-envelope/pfs/message";

/// One encrypted session message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SealedMessage {
    pub salt: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl SealedMessage {
    /// The "session established, nothing to say yet" message.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.salt.is_empty() && self.ciphertext.is_empty()
    }
}

pub struct PfsSession {
    session_id: [u8; SESSION_ID_BYTES],
    key_a: Zeroizing<[u8; AES_KEY_BYTES]>,
    key_b: Zeroizing<[u8; AES_KEY_BYTES]>,
    associated_data: Vec<u8>,
    is_initiator: bool,
}

impl PfsSession {
    pub fn start_initiator(secret: &SharedSecret, associated_data: &[u8]) -> Result<Self> {
        Self::new(secret, associated_data, true)
    }

    pub fn start_responder(secret: &SharedSecret, associated_data: &[u8]) -> Result<Self> {
        Self::new(secret, associated_data, false)
    }

    fn new(secret: &SharedSecret, associated_data: &[u8], is_initiator: bool) -> Result<Self> {
        let ss = secret.as_bytes();
        let mut key_a = Zeroizing::new([0u8; AES_KEY_BYTES]);
        let mut key_b = Zeroizing::new([0u8; AES_KEY_BYTES]);
        key_a.copy_from_slice(&ss[..AES_KEY_BYTES]);
        key_b.copy_from_slice(&ss[AES_KEY_BYTES..]);

        let mut session_id = [0u8; SESSION_ID_BYTES];
        hkdf_sha256(&ss[..], Some(associated_data), SESSION_INFO, &mut session_id)?;

        Ok(Self {
            session_id,
            key_a,
            key_b,
            associated_data: associated_data.to_vec(),
            is_initiator,
        })
    }

    pub fn session_id(&self) -> &[u8; SESSION_ID_BYTES] {
        &self.session_id
    }

    pub fn associated_data(&self) -> &[u8] {
        &self.associated_data
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    fn sending_key(&self) -> &[u8; AES_KEY_BYTES] {
        if self.is_initiator {
            &self.key_a
        } else {
            &self.key_b
        }
    }

    fn receiving_key(&self) -> &[u8; AES_KEY_BYTES] {
        if self.is_initiator {
            &self.key_b
        } else {
            &self.key_a
        }
    }

    fn message_keys(
        key: &[u8; AES_KEY_BYTES],
        salt: &[u8],
    ) -> Result<(Zeroizing<[u8; AES_KEY_BYTES]>, [u8; NONCE_BYTES])> {
        let mut okm = Zeroizing::new([0u8; AES_KEY_BYTES + NONCE_BYTES]);
        hkdf_sha256(key, Some(salt), MESSAGE_INFO, &mut okm[..])?;
        let mut message_key = Zeroizing::new([0u8; AES_KEY_BYTES]);
        let mut nonce = [0u8; NONCE_BYTES];
        message_key.copy_from_slice(&okm[..AES_KEY_BYTES]);
        nonce.copy_from_slice(&okm[AES_KEY_BYTES..]);
        Ok((message_key, nonce))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedMessage> {
        let salt: [u8; SALT_BYTES] = random_bytes()?;
        let (key, nonce) = Self::message_keys(self.sending_key(), &salt)?;
        let ciphertext = aead_seal(&key, &nonce, plaintext, &self.associated_data)?;
        Ok(SealedMessage {
            salt: salt.to_vec(),
            ciphertext,
        })
    }

    /// An empty salt together with an empty ciphertext is the control
    /// message and yields an empty plaintext. Any other salt length is
    /// rejected before key derivation.
    pub fn decrypt(&self, salt: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if salt.is_empty() && ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        if salt.len() != SALT_BYTES {
            return Err(Error::InvalidParameter("pfs salt length"));
        }
        let (key, nonce) = Self::message_keys(self.receiving_key(), salt)?;
        aead_open(&key, &nonce, ciphertext, &self.associated_data)
    }

    pub fn decrypt_message(&self, message: &SealedMessage) -> Result<Vec<u8>> {
        self.decrypt(&message.salt, &message.ciphertext)
    }
}

impl fmt::Debug for PfsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PfsSession")
            .field("session_id", &hex::encode(self.session_id))
            .field("is_initiator", &self.is_initiator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintAlgorithm;
    use crate::keys::{KeyAlgorithm, Keypair};
    use crate::x3dh;

    fn secret() -> SharedSecret {
        let kp = Keypair::generate(KeyAlgorithm::Ed25519, FingerprintAlgorithm::Sha512Truncated).unwrap();
        x3dh::initiate(&kp.private_key, &kp.private_key, &kp.public_key, &kp.public_key, None).unwrap()
    }

    fn pair(ad: &[u8]) -> (PfsSession, PfsSession) {
        let ss = secret();
        (
            PfsSession::start_initiator(&ss, ad).unwrap(),
            PfsSession::start_responder(&ss, ad).unwrap(),
        )
    }

    #[test]
    fn test_directional_keys() {
        let (a, b) = pair(b"ad");
        let m = a.encrypt(b"ping").unwrap();
        assert_eq!(b.decrypt_message(&m).unwrap(), b"ping");
        // The sender cannot read its own message.
        assert!(matches!(a.decrypt_message(&m), Err(Error::TagMismatch)));

        let reply = b.encrypt(b"pong").unwrap();
        assert_eq!(a.decrypt_message(&reply).unwrap(), b"pong");
    }

    #[test]
    fn test_session_id_shared_and_bound_to_ad() {
        let ss = secret();
        let a = PfsSession::start_initiator(&ss, b"ad-1").unwrap();
        let b = PfsSession::start_responder(&ss, b"ad-1").unwrap();
        let c = PfsSession::start_responder(&ss, b"ad-2").unwrap();
        assert_eq!(a.session_id(), b.session_id());
        assert_ne!(a.session_id(), c.session_id());
    }

    #[test]
    fn test_salt_is_fresh() {
        let (a, _) = pair(b"");
        let m1 = a.encrypt(b"same").unwrap();
        let m2 = a.encrypt(b"same").unwrap();
        assert_eq!(m1.salt.len(), SALT_BYTES);
        assert_ne!(m1.salt, m2.salt);
        assert_ne!(m1.ciphertext, m2.ciphertext);
    }

    #[test]
    fn test_empty_control_message() {
        let (_, b) = pair(b"ad");
        assert!(SealedMessage::empty().is_empty());
        assert_eq!(b.decrypt_message(&SealedMessage::empty()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_ad_mismatch_fails() {
        let ss = secret();
        let a = PfsSession::start_initiator(&ss, b"ad-1").unwrap();
        let b = PfsSession::start_responder(&ss, b"ad-2").unwrap();
        let m = a.encrypt(b"x").unwrap();
        assert!(matches!(b.decrypt_message(&m), Err(Error::TagMismatch)));
    }

    #[test]
    fn test_bad_salt_length() {
        let (a, b) = pair(b"");
        let m = a.encrypt(b"x").unwrap();
        assert!(matches!(b.decrypt(&m.salt[..15], &m.ciphertext), Err(Error::InvalidParameter(_))));
        assert!(matches!(b.decrypt(b"", &m.ciphertext), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_debug_hides_keys() {
        let (a, _) = pair(b"");
        let dbg = format!("{a:?}");
        assert!(dbg.contains("session_id"));
        assert!(!dbg.contains("key_a"));
    }
}
