//! Engine configuration.
//!
//! One [`CryptoConfig`] is built at startup and handed to [`crate::Crypto`];
//! nothing in the crate reads process-wide defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::KeyAlgorithm;

/// Lowest PBKDF2 iteration count accepted on encrypt or decrypt.
pub const MIN_PASSWORD_ITERATIONS: u32 = 10_000;

/// Highest PBKDF2 iteration count attempted on decrypt. Envelopes carrying
/// more are skipped rather than allowed to pin a CPU.
pub const MAX_PASSWORD_ITERATIONS: u32 = 10_000_000;

pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;

/// Default plaintext chunk size for chunked content (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Largest chunk size written or accepted (64 MiB); bounds the decrypt buffer.
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Selectable algorithms
// ---------------------------------------------------------------------------

/// How a receiver id is derived from an encoded public key.
///
/// Not carried in envelopes; both parties must agree on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintAlgorithm {
    /// First 8 bytes of SHA-512.
    #[default]
    Sha512Truncated,
    /// Full SHA-256 digest.
    Sha256,
}

/// Digest signed by the signature subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

/// Layout of the encrypted body that follows the envelope header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ContentMode {
    /// One AES-GCM context over the whole body, single trailing tag.
    #[default]
    Stream,
    /// Independently sealed chunks of `chunk_size` plaintext bytes.
    Chunked { chunk_size: u32 },
}

impl ContentMode {
    pub fn chunked() -> Self {
        ContentMode::Chunked {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// CryptoConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CryptoConfig {
    /// Algorithm used by `generate_keypair`.
    pub key_algorithm: KeyAlgorithm,
    pub fingerprint: FingerprintAlgorithm,
    pub signature_hash: HashAlgorithm,
    pub content_mode: ContentMode,
    /// PBKDF2 iterations for new password recipients and exported keys.
    pub password_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_algorithm: KeyAlgorithm::Ed25519,
            fingerprint: FingerprintAlgorithm::Sha512Truncated,
            signature_hash: HashAlgorithm::Sha512,
            content_mode: ContentMode::Stream,
            password_iterations: DEFAULT_PASSWORD_ITERATIONS,
        }
    }
}

impl CryptoConfig {
    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CryptoConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.password_iterations < MIN_PASSWORD_ITERATIONS {
            return Err(Error::InvalidParameter("password iterations below minimum"));
        }
        if self.password_iterations > MAX_PASSWORD_ITERATIONS {
            return Err(Error::InvalidParameter("password iterations above maximum"));
        }
        if let ContentMode::Chunked { chunk_size } = self.content_mode {
            if chunk_size == 0 {
                return Err(Error::InvalidParameter("chunk size must be at least 1"));
            }
            if chunk_size > MAX_CHUNK_SIZE {
                return Err(Error::InvalidParameter("chunk size above maximum"));
            }
            if chunk_size < 4096 {
                tracing::warn!(chunk_size, "small chunk size inflates ciphertext by 16 bytes per chunk");
            }
        }
        Ok(())
    }
}
