//! The `Crypto` façade.
//!
//! One value per configuration; every entry point the card and session
//! layers consume goes through it. It holds no mutable state and can be
//! shared freely between threads.

use std::io::{Read, Write};

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher::{self, Credential, EnvelopeCipher};
use crate::config::CryptoConfig;
use crate::error::{Error, Result};
use crate::keys::{self, Keypair, PrivateKey, PublicKey};
use crate::pfs::PfsSession;
use crate::sign;
use crate::wire::ParamValue;
use crate::x3dh;

/// Custom param holding the detached signature in sign-then-encrypt output.
pub const SIGNATURE_PARAM: &str = "VIRGIL-DATA-SIGNATURE";
/// Custom param holding the signer's receiver id.
pub const SIGNER_ID_PARAM: &str = "VIRGIL-DATA-SIGNER-ID";

#[derive(Clone, Debug, Default)]
pub struct Crypto {
    config: CryptoConfig,
}

impl Crypto {
    pub fn new(config: CryptoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    // === Keys ===

    pub fn generate_keypair(&self) -> Result<Keypair> {
        Keypair::generate(self.config.key_algorithm, self.config.fingerprint)
    }

    /// `password` selects the password-protected encoding.
    pub fn import_private_key(&self, data: &[u8], password: Option<&[u8]>) -> Result<PrivateKey> {
        match password {
            Some(pw) => PrivateKey::from_encrypted_der(data, pw, self.config.fingerprint),
            None => PrivateKey::from_der(data, self.config.fingerprint),
        }
    }

    pub fn export_private_key(&self, key: &PrivateKey, password: Option<&[u8]>) -> Result<Zeroizing<Vec<u8>>> {
        match password {
            Some(pw) => key
                .to_encrypted_der(pw, self.config.password_iterations)
                .map(Zeroizing::new),
            None => Ok(key.to_der()),
        }
    }

    pub fn import_public_key(&self, data: &[u8]) -> Result<PublicKey> {
        PublicKey::from_der(data, self.config.fingerprint)
    }

    pub fn export_public_key(&self, key: &PublicKey) -> Vec<u8> {
        key.to_der()
    }

    pub fn extract_public_key(&self, key: &PrivateKey) -> PublicKey {
        key.public_key()
    }

    /// Fingerprint of arbitrary bytes under the configured algorithm.
    pub fn calculate_fingerprint(&self, data: &[u8]) -> Vec<u8> {
        keys::fingerprint(self.config.fingerprint, data)
    }

    // === Encryption ===

    /// A fresh envelope builder in the configured content mode.
    pub fn cipher(&self) -> Result<EnvelopeCipher> {
        EnvelopeCipher::new(self.config.content_mode)
    }

    fn cipher_for(&self, recipients: &[PublicKey]) -> Result<EnvelopeCipher> {
        let mut c = self.cipher()?;
        for r in recipients {
            c.add_key_recipient(r)?;
        }
        Ok(c)
    }

    pub fn encrypt(&self, data: &[u8], recipients: &[PublicKey]) -> Result<Vec<u8>> {
        self.cipher_for(recipients)?.encrypt(data)
    }

    pub fn encrypt_with_password(&self, data: &[u8], password: &[u8]) -> Result<Vec<u8>> {
        let mut c = self.cipher()?;
        c.add_password_recipient(password, self.config.password_iterations)?;
        c.encrypt(data)
    }

    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        recipients: &[PublicKey],
    ) -> Result<()> {
        self.cipher_for(recipients)?.encrypt_stream(reader, writer)
    }

    pub fn decrypt(&self, data: &[u8], key: &PrivateKey) -> Result<Vec<u8>> {
        Ok(cipher::open(data, Credential::Key(key))?.plaintext)
    }

    pub fn decrypt_with_password(&self, data: &[u8], password: &[u8]) -> Result<Vec<u8>> {
        Ok(cipher::open(data, Credential::Password(password))?.plaintext)
    }

    /// Partial output written before an error is untrusted.
    pub fn decrypt_stream<R: Read, W: Write>(&self, reader: &mut R, writer: &mut W, key: &PrivateKey) -> Result<()> {
        cipher::open_stream(reader, writer, Credential::Key(key)).map(|_| ())
    }

    // === Signatures ===

    pub fn sign(&self, data: &[u8], key: &PrivateKey) -> Result<Vec<u8>> {
        sign::sign(data, key, self.config.signature_hash)
    }

    pub fn sign_stream<R: Read>(&self, reader: &mut R, key: &PrivateKey) -> Result<Vec<u8>> {
        sign::sign_stream(reader, key, self.config.signature_hash)
    }

    pub fn verify(&self, data: &[u8], signature: &[u8], key: &PublicKey) -> Result<()> {
        sign::verify(data, signature, key)
    }

    pub fn verify_stream<R: Read>(&self, reader: &mut R, signature: &[u8], key: &PublicKey) -> Result<()> {
        sign::verify_stream(reader, signature, key)
    }

    pub fn sign_then_encrypt(&self, data: &[u8], signer: &PrivateKey, recipients: &[PublicKey]) -> Result<Vec<u8>> {
        let signature = self.sign(data, signer)?;
        let mut c = self.cipher_for(recipients)?;
        c.set_param(SIGNATURE_PARAM, ParamValue::Bytes(signature));
        c.set_param(SIGNER_ID_PARAM, ParamValue::Bytes(signer.receiver_id().as_bytes().to_vec()));
        c.encrypt(data)
    }

    /// Decrypt, then check the embedded signature against whichever of
    /// `verifiers` produced it.
    pub fn decrypt_then_verify(&self, data: &[u8], key: &PrivateKey, verifiers: &[PublicKey]) -> Result<Vec<u8>> {
        if verifiers.is_empty() {
            return Err(Error::InvalidParameter("no verifier keys"));
        }
        let opened = cipher::open(data, Credential::Key(key))?;
        let signature = match opened.custom_params.get(SIGNATURE_PARAM) {
            Some(ParamValue::Bytes(b)) => b,
            _ => return Err(Error::SignatureNotFound),
        };
        let signer_id = match opened.custom_params.get(SIGNER_ID_PARAM) {
            Some(ParamValue::Bytes(b)) => b,
            _ => return Err(Error::SignatureNotFound),
        };
        let verifier = verifiers
            .iter()
            .find(|v| bool::from(v.receiver_id().as_bytes().ct_eq(&signer_id[..])))
            .ok_or(Error::SignatureNotFound)?;
        sign::verify(&opened.plaintext, signature, verifier)?;
        Ok(opened.plaintext)
    }

    // === Sessions ===

    /// Initiator: run X3DH against the responder's published keys and open
    /// a session.
    pub fn start_pfs_session(
        &self,
        ic_a: &PrivateKey,
        ek_a: &PrivateKey,
        ic_b: &PublicKey,
        ltc_b: &PublicKey,
        otc_b: Option<&PublicKey>,
        associated_data: &[u8],
    ) -> Result<PfsSession> {
        let secret = x3dh::initiate(ic_a, ek_a, ic_b, ltc_b, otc_b)?;
        PfsSession::start_initiator(&secret, associated_data)
    }

    pub fn receive_pfs_session(
        &self,
        ic_a: &PublicKey,
        ek_a: &PublicKey,
        ic_b: &PrivateKey,
        ltc_b: &PrivateKey,
        otc_b: Option<&PrivateKey>,
        associated_data: &[u8],
    ) -> Result<PfsSession> {
        let secret = x3dh::respond(ic_a, ek_a, ic_b, ltc_b, otc_b)?;
        PfsSession::start_responder(&secret, associated_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContentMode, FingerprintAlgorithm};
    use crate::keys::KeyAlgorithm;

    fn fast() -> Crypto {
        Crypto::new(CryptoConfig {
            password_iterations: 10_000,
            ..CryptoConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_validates() {
        let result = Crypto::new(CryptoConfig {
            password_iterations: 1,
            ..CryptoConfig::default()
        });
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_generate_follows_config() {
        let crypto = Crypto::new(CryptoConfig {
            key_algorithm: KeyAlgorithm::X25519,
            fingerprint: FingerprintAlgorithm::Sha256,
            ..CryptoConfig::default()
        })
        .unwrap();
        let kp = crypto.generate_keypair().unwrap();
        assert_eq!(kp.private_key.algorithm(), KeyAlgorithm::X25519);
        assert_eq!(kp.public_key.receiver_id().as_bytes().len(), 32);
    }

    #[test]
    fn test_key_export_import() {
        let crypto = fast();
        let kp = crypto.generate_keypair().unwrap();
        let plain = crypto.export_private_key(&kp.private_key, None).unwrap();
        let back = crypto.import_private_key(&plain, None).unwrap();
        assert_eq!(crypto.extract_public_key(&back), kp.public_key);

        let locked = crypto.export_private_key(&kp.private_key, Some(b"pw")).unwrap();
        assert!(crypto.import_private_key(&locked, None).is_err());
        let back = crypto.import_private_key(&locked, Some(b"pw")).unwrap();
        assert_eq!(back.receiver_id(), kp.private_key.receiver_id());

        let der = crypto.export_public_key(&kp.public_key);
        assert_eq!(crypto.import_public_key(&der).unwrap(), kp.public_key);
        assert_eq!(crypto.calculate_fingerprint(&der), kp.public_key.receiver_id().as_bytes());
    }

    #[test]
    fn test_password_envelope() {
        let crypto = fast();
        let ct = crypto.encrypt_with_password(b"data", b"pw").unwrap();
        assert_eq!(crypto.decrypt_with_password(&ct, b"pw").unwrap(), b"data");
        assert!(matches!(crypto.decrypt_with_password(&ct, b"px"), Err(Error::RecipientNotFound)));
    }

    #[test]
    fn test_sign_then_encrypt() {
        let crypto = fast();
        let (alice, bob, carol) = (crypto.generate_keypair().unwrap(), crypto.generate_keypair().unwrap(), crypto.generate_keypair().unwrap());
        let ct = crypto
            .sign_then_encrypt(b"signed", &alice.private_key, &[bob.public_key.clone()])
            .unwrap();

        let verifiers = [carol.public_key.clone(), alice.public_key.clone()];
        let pt = crypto.decrypt_then_verify(&ct, &bob.private_key, &verifiers).unwrap();
        assert_eq!(pt, b"signed");

        let result = crypto.decrypt_then_verify(&ct, &bob.private_key, &[carol.public_key]);
        assert!(matches!(result, Err(Error::SignatureNotFound)));
    }

    #[test]
    fn test_unsigned_envelope_has_no_signature() {
        let crypto = fast();
        let kp = crypto.generate_keypair().unwrap();
        let ct = crypto.encrypt(b"plain", &[kp.public_key.clone()]).unwrap();
        let result = crypto.decrypt_then_verify(&ct, &kp.private_key, &[kp.public_key]);
        assert!(matches!(result, Err(Error::SignatureNotFound)));
    }

    #[test]
    fn test_stream_entry_points() {
        let crypto = Crypto::new(CryptoConfig {
            content_mode: ContentMode::Chunked { chunk_size: 1000 },
            ..CryptoConfig::default()
        })
        .unwrap();
        let kp = crypto.generate_keypair().unwrap();
        let data = vec![0xC3u8; 4321];

        let mut ct = Vec::new();
        crypto
            .encrypt_stream(&mut &data[..], &mut ct, &[kp.public_key.clone()])
            .unwrap();
        let mut pt = Vec::new();
        crypto.decrypt_stream(&mut &ct[..], &mut pt, &kp.private_key).unwrap();
        assert_eq!(pt, data);

        let sig = crypto.sign_stream(&mut &data[..], &kp.private_key).unwrap();
        crypto.verify_stream(&mut &data[..], &sig, &kp.public_key).unwrap();
        crypto.verify(&data, &sig, &kp.public_key).unwrap();
    }
}
