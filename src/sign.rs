//! Detached signatures
//!
//! ```text
//! Signature ::= SEQUENCE { SEQUENCE { OID hash, NULL }, OCTET STRING sig[64] }
//! ```
//!
//! Ed25519 signs the digest of the input, so streams are hashed
//! incrementally and never buffered. The verifier takes the hash from the
//! wrapper; any wrapper it cannot parse fails verification.

use std::io::{ErrorKind, Read};

use ed25519_dalek::{Signature, Signer};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::config::HashAlgorithm;
use crate::der::{Reader, Writer};
use crate::error::{DecodeError, Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::oid;

pub const SIGNATURE_BYTES: usize = 64;

impl HashAlgorithm {
    pub fn oid(self) -> &'static [u8] {
        match self {
            HashAlgorithm::Sha256 => oid::SHA256,
            HashAlgorithm::Sha384 => oid::SHA384,
            HashAlgorithm::Sha512 => oid::SHA512,
        }
    }

    fn from_oid(value: &[u8]) -> core::result::Result<Self, DecodeError> {
        match value {
            o if o == oid::SHA256 => Ok(HashAlgorithm::Sha256),
            o if o == oid::SHA384 => Ok(HashAlgorithm::Sha384),
            o if o == oid::SHA512 => Ok(HashAlgorithm::Sha512),
            _ => Err(DecodeError::UnsupportedAlgorithm("signature hash")),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut h = Hasher::new(algorithm);
    h.update(data);
    h.finish()
}

fn digest_stream<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> Result<Vec<u8>> {
    let mut h = Hasher::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => h.update(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(h.finish())
}

fn encode(algorithm: HashAlgorithm, signature: &Signature) -> Vec<u8> {
    let mut w = Writer::new();
    w.sequence(|w| {
        w.sequence(|w| {
            w.oid(algorithm.oid());
            w.null();
        });
        w.octet_string(&signature.to_bytes());
    });
    w.into_bytes()
}

fn decode(data: &[u8]) -> core::result::Result<(HashAlgorithm, Signature), DecodeError> {
    let mut outer = Reader::new(data);
    let mut r = outer.sequence()?;
    outer.finish()?;
    let mut alg = r.sequence()?;
    let algorithm = HashAlgorithm::from_oid(alg.oid()?)?;
    alg.null()?;
    alg.finish()?;
    let raw: &[u8; SIGNATURE_BYTES] = r
        .octet_string()?
        .try_into()
        .map_err(|_| DecodeError::Structural("signature length"))?;
    r.finish()?;
    Ok((algorithm, Signature::from_bytes(raw)))
}

fn sign_digest(digest: &[u8], key: &PrivateKey, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    let signature = key.signing_key()?.sign(digest);
    Ok(encode(algorithm, &signature))
}

/// Sign `data`, producing a detached signature wrapper.
pub fn sign(data: &[u8], key: &PrivateKey, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    sign_digest(&digest(algorithm, data), key, algorithm)
}

pub fn sign_stream<R: Read>(reader: &mut R, key: &PrivateKey, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    key.signing_key()?;
    sign_digest(&digest_stream(algorithm, reader)?, key, algorithm)
}

fn verify_digest(digest: &[u8], signature: &Signature, key: &PublicKey) -> Result<()> {
    key.verifying_key()?
        .verify_strict(digest, signature)
        .map_err(|_| Error::SignVerificationFailed)
}

/// Any problem with `signature` itself is [`Error::SignVerificationFailed`];
/// an agreement-only `key` is [`Error::UnsupportedKeyType`].
pub fn verify(data: &[u8], signature: &[u8], key: &PublicKey) -> Result<()> {
    key.verifying_key()?;
    let (algorithm, sig) = decode(signature).map_err(|_| Error::SignVerificationFailed)?;
    verify_digest(&digest(algorithm, data), &sig, key)
}

pub fn verify_stream<R: Read>(reader: &mut R, signature: &[u8], key: &PublicKey) -> Result<()> {
    key.verifying_key()?;
    let (algorithm, sig) = decode(signature).map_err(|_| Error::SignVerificationFailed)?;
    verify_digest(&digest_stream(algorithm, reader)?, &sig, key)
}
